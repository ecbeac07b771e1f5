//! Handshake message handling.
//!
//! ```text
//!   Initiator (A)                                   Responder (B)
//!   start()            ── KEY_INIT ──▶               handle_key_init()
//!   handle_key_resp()  ◀── KEY_RESP ──
//!   send_confirm()     ── KEY_CONFIRM_A ──▶          accept_confirm()
//!   accept_confirm()   ◀── KEY_CONFIRM_B ──          send_confirm()
//! ```
//!
//! Signatures are always checked before anything else in a handshake body
//! is trusted. A KEY_INIT that fails verification creates no state.

use ake_crypto::{
    hash::{constant_time_eq, sha256},
    kdf::{derive_session_key, generate_nonce, KdfContext},
    EphemeralKeyPair, PublicKeyBytes, SessionKey, SharedSecret,
};
use ake_proto::{
    validate_username, KeyInitBody, KeyRespBody, Role, SessionId, Signed, PROTOCOL_VERSION,
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    config::HandshakeSettings,
    context::{HandshakeState, Rejected, SessionContext},
    error::SessionError,
    identity::IdentityAccess,
    transcript::{TranscriptHash, TranscriptLedger},
};

/// Output of a successful key derivation.
#[derive(Debug, Clone)]
pub struct DerivedSession {
    pub session_key: SessionKey,
    pub session_id: SessionId,
    pub transcript_hash: TranscriptHash,
}

/// Handshake operations for one local identity.
pub struct Handshake<'a, I: IdentityAccess + ?Sized> {
    identity: &'a I,
    settings: &'a HandshakeSettings,
}

impl<'a, I: IdentityAccess + ?Sized> Handshake<'a, I> {
    pub fn new(identity: &'a I, settings: &'a HandshakeSettings) -> Self {
        Self { identity, settings }
    }

    /// Begin a handshake as initiator.
    pub fn start(
        &self,
        self_username: &str,
        peer_username: &str,
    ) -> Result<(Signed<KeyInitBody>, SessionContext), SessionError> {
        validate_username(self_username)?;
        validate_username(peer_username)?;
        if self_username == peer_username {
            return Err(SessionError::MalformedMessage("cannot open a session with yourself".into()));
        }

        let ephemeral = EphemeralKeyPair::generate();
        let session_id = SessionId::random();
        let nonce_a = generate_nonce();

        let body = KeyInitBody {
            version: PROTOCOL_VERSION,
            session_id,
            initiator: self_username.to_string(),
            responder: peer_username.to_string(),
            ephemeral_public: ephemeral.public_bytes(),
            nonce: nonce_a,
            timestamp: Utc::now().timestamp_millis(),
        };
        let canonical = body.canonical_bytes();
        let signature = self.identity.sign(&canonical)?;

        let mut ctx = SessionContext::new(session_id, Role::Initiator, self_username, peer_username, ephemeral);
        ctx.nonce_a = Some(nonce_a);
        ctx.init_digest = Some(sha256(&canonical));
        let ctx = ctx.advance(HandshakeState::InitSent)?;

        debug!(session = %session_id, peer = peer_username, "KEY_INIT built");
        Ok((Signed { body, signature }, ctx))
    }

    /// Answer a KEY_INIT as responder.
    ///
    /// On success the session key is already derived; the returned context
    /// waits for KEY_CONFIRM_A.
    pub fn handle_key_init(
        &self,
        body: &KeyInitBody,
        signature: &[u8],
        initiator_public_key: &PublicKeyBytes,
        self_username: &str,
    ) -> Result<(Signed<KeyRespBody>, SessionContext), SessionError> {
        initiator_public_key
            .verify(&body.canonical_bytes(), signature)
            .map_err(|_| {
                warn!(session = %body.session_id, claimed = %body.initiator, "KEY_INIT signature rejected");
                SessionError::Authentication
            })?;

        body.validate()?;
        if body.responder != self_username {
            return Err(SessionError::MalformedMessage(format!(
                "KEY_INIT addressed to {:?}, not {self_username:?}",
                body.responder
            )));
        }
        self.check_freshness(body.timestamp)?;

        let ephemeral = EphemeralKeyPair::generate();
        let nonce_b = generate_nonce();
        let resp = KeyRespBody {
            version: PROTOCOL_VERSION,
            session_id: body.session_id,
            initiator: body.initiator.clone(),
            responder: body.responder.clone(),
            ephemeral_public: ephemeral.public_bytes(),
            nonce: nonce_b,
            timestamp: Utc::now().timestamp_millis(),
        };

        let mut ctx = SessionContext::new(
            body.session_id,
            Role::Responder,
            self_username,
            &body.initiator,
            ephemeral,
        );
        ctx.nonce_a = Some(body.nonce);
        ctx.nonce_b = Some(nonce_b);
        ctx.peer_ephemeral_public = Some(body.ephemeral_public);

        let signature = self.identity.sign(&resp.canonical_bytes())?;
        let mut ctx = ctx.advance(HandshakeState::RespSent)?;

        let ephemeral = ctx
            .ephemeral
            .take()
            .ok_or_else(|| SessionError::state("responder ephemeral missing"))?;
        let shared = ephemeral.agree(&body.ephemeral_public)?;
        let th = TranscriptLedger::hash(body, &resp);
        let key = session_key_for(&shared, &body.nonce, &nonce_b, body)?;

        ctx.transcript_hash = Some(th);
        ctx.session_key = Some(key);
        let ctx = ctx
            .advance(HandshakeState::KeyDerived)?
            .advance(HandshakeState::AwaitingPeerConfirm)?;

        debug!(session = %body.session_id, peer = %body.initiator, "KEY_RESP built, session key derived");
        Ok((Signed { body: resp, signature }, ctx))
    }

    /// Process KEY_RESP as initiator. `init_body` must be the KEY_INIT body
    /// this context sent.
    pub fn handle_key_resp(
        &self,
        resp_body: &KeyRespBody,
        resp_signature: &[u8],
        responder_public_key: &PublicKeyBytes,
        init_body: &KeyInitBody,
        mut ctx: SessionContext,
    ) -> Result<(DerivedSession, SessionContext), Rejected> {
        if ctx.state != HandshakeState::InitSent || ctx.role != Role::Initiator {
            let msg = format!("unexpected KEY_RESP in state {}", ctx.state);
            return Err(Rejected::new(ctx, SessionError::state(msg)));
        }
        if resp_body.session_id != ctx.session_id
            || resp_body.initiator != ctx.self_username
            || resp_body.responder != ctx.peer_username
        {
            return Err(Rejected::new(ctx, SessionError::state("KEY_RESP does not match this session")));
        }
        if let Err(e) = resp_body.validate() {
            return Err(Rejected::new(ctx, e.into()));
        }

        if responder_public_key
            .verify(&resp_body.canonical_bytes(), resp_signature)
            .is_err()
        {
            warn!(session = %ctx.session_id, claimed = %resp_body.responder, "KEY_RESP signature rejected");
            return Err(Rejected::new(ctx, SessionError::Authentication));
        }
        if let Err(e) = self.check_freshness(resp_body.timestamp) {
            return Err(Rejected::new(ctx, e));
        }

        let init_canonical = init_body.canonical_bytes();
        let sent_this_init = ctx
            .init_digest
            .map(|d| constant_time_eq(&d, &sha256(&init_canonical)))
            .unwrap_or(false);
        if !sent_this_init {
            warn!(session = %ctx.session_id, "KEY_INIT presented with KEY_RESP differs from the one sent");
            return Err(Rejected::new(ctx, SessionError::TranscriptMismatch));
        }

        let Some(ephemeral) = ctx.ephemeral.take() else {
            return Err(Rejected::new(ctx, SessionError::state("initiator ephemeral already consumed")));
        };
        let shared = match ephemeral.agree(&resp_body.ephemeral_public) {
            Ok(s) => s,
            Err(e) => return Err(Rejected::new(ctx, e.into())),
        };
        let th = TranscriptLedger::hash_canonical(&init_canonical, &resp_body.canonical_bytes());
        let key = match session_key_for(&shared, &init_body.nonce, &resp_body.nonce, init_body) {
            Ok(k) => k,
            Err(e) => return Err(Rejected::new(ctx, e)),
        };

        ctx.peer_ephemeral_public = Some(resp_body.ephemeral_public);
        ctx.nonce_b = Some(resp_body.nonce);
        ctx.transcript_hash = Some(th);
        ctx.session_key = Some(key.clone());
        let ctx = ctx.advance(HandshakeState::KeyDerived)?;

        debug!(session = %ctx.session_id, peer = %ctx.peer_username, "session key derived");
        Ok((
            DerivedSession { session_key: key, session_id: ctx.session_id, transcript_hash: th },
            ctx,
        ))
    }

    fn check_freshness(&self, timestamp_ms: i64) -> Result<(), SessionError> {
        let max_skew_ms = u64::try_from(self.settings.max_clock_skew_secs)
            .unwrap_or(0)
            .saturating_mul(1000);
        let skew = Utc::now().timestamp_millis().abs_diff(timestamp_ms);
        if skew > max_skew_ms {
            return Err(SessionError::MalformedMessage(format!(
                "handshake timestamp {skew} ms away from local clock"
            )));
        }
        Ok(())
    }
}

fn session_key_for(
    shared: &SharedSecret,
    nonce_a: &[u8; 32],
    nonce_b: &[u8; 32],
    init: &KeyInitBody,
) -> Result<SessionKey, SessionError> {
    let context = KdfContext {
        session_id: init.session_id.as_bytes(),
        initiator: &init.initiator,
        responder: &init.responder,
    };
    Ok(derive_session_key(shared, nonce_a, nonce_b, &context)?)
}
