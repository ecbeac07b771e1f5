//! Per-session handshake context and its state transitions.
//!
//! Transitions take the context by value and hand back the updated one. A
//! failed transition returns the context inside [`Rejected`]: unchanged
//! when the fault only discards the message, already `Aborted` (ephemeral
//! and session key dropped) when the fault is a verification failure.

use std::fmt;

use ake_crypto::{EphemeralKeyPair, SessionKey};
use ake_proto::{ConfirmPayload, Role, SessionId};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    confirm::{build_key_confirm, verify_key_confirm},
    error::{Disposition, SessionError},
    transcript::TranscriptHash,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    InitSent,
    RespSent,
    KeyDerived,
    AwaitingPeerConfirm,
    Confirmed,
    Aborted,
}

impl HandshakeState {
    /// Position in the handshake. Transitions only ever increase it.
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::InitSent | Self::RespSent => 1,
            Self::KeyDerived => 2,
            Self::AwaitingPeerConfirm => 3,
            Self::Confirmed => 4,
            Self::Aborted => 5,
        }
    }

    /// The session key exists from `KeyDerived` onwards.
    pub fn has_key(self) -> bool {
        matches!(self, Self::KeyDerived | Self::AwaitingPeerConfirm | Self::Confirmed)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A transition that did not go through. `context` is what the caller
/// keeps; if `error` aborts the session the context is already `Aborted`
/// and should be discarded.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejected {
    pub context: Box<SessionContext>,
    #[source]
    pub error: SessionError,
}

impl Rejected {
    pub(crate) fn new(context: SessionContext, error: SessionError) -> Self {
        let context = match error.disposition() {
            Disposition::AbortSession => context.abort(),
            Disposition::Discard => context,
        };
        Self { context: Box::new(context), error }
    }

    pub fn into_parts(self) -> (SessionContext, SessionError) {
        (*self.context, self.error)
    }
}

impl From<Rejected> for SessionError {
    fn from(r: Rejected) -> Self {
        r.error
    }
}

pub struct SessionContext {
    pub(crate) session_id: SessionId,
    pub(crate) role: Role,
    pub(crate) self_username: String,
    pub(crate) peer_username: String,
    /// Own ephemeral; `None` once consumed by the agreement or on abort.
    pub(crate) ephemeral: Option<EphemeralKeyPair>,
    pub(crate) own_ephemeral_public: [u8; 32],
    pub(crate) peer_ephemeral_public: Option<[u8; 32]>,
    pub(crate) nonce_a: Option<[u8; 32]>,
    pub(crate) nonce_b: Option<[u8; 32]>,
    /// SHA-256 of the canonical KEY_INIT this initiator sent.
    pub(crate) init_digest: Option<[u8; 32]>,
    pub(crate) transcript_hash: Option<TranscriptHash>,
    pub(crate) session_key: Option<SessionKey>,
    pub(crate) state: HandshakeState,
    pub(crate) created_at: DateTime<Utc>,
}

impl SessionContext {
    pub(crate) fn new(
        session_id: SessionId,
        role: Role,
        self_username: &str,
        peer_username: &str,
        ephemeral: EphemeralKeyPair,
    ) -> Self {
        Self {
            session_id,
            role,
            self_username: self_username.to_string(),
            peer_username: peer_username.to_string(),
            own_ephemeral_public: ephemeral.public_bytes(),
            ephemeral: Some(ephemeral),
            peer_ephemeral_public: None,
            nonce_a: None,
            nonce_b: None,
            init_digest: None,
            transcript_hash: None,
            session_key: None,
            state: HandshakeState::Idle,
            created_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn self_username(&self) -> &str {
        &self.self_username
    }

    pub fn peer_username(&self) -> &str {
        &self.peer_username
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn own_ephemeral_public(&self) -> &[u8; 32] {
        &self.own_ephemeral_public
    }

    pub fn peer_ephemeral_public(&self) -> Option<&[u8; 32]> {
        self.peer_ephemeral_public.as_ref()
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    pub fn transcript_hash(&self) -> Option<&TranscriptHash> {
        self.transcript_hash.as_ref()
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == HandshakeState::Confirmed
    }

    /// Move to `next`, refusing anything that is not strictly forward.
    pub(crate) fn advance(mut self, next: HandshakeState) -> Result<Self, Rejected> {
        if self.state == HandshakeState::Aborted || next.rank() <= self.state.rank() {
            let msg = format!("illegal transition {} -> {next}", self.state);
            return Err(Rejected::new(self, SessionError::state(msg)));
        }
        debug!(session = %self.session_id, role = ?self.role, from = %self.state, to = %next, "handshake transition");
        self.state = next;
        Ok(self)
    }

    /// Drop all secret material and move to `Aborted`.
    pub fn abort(mut self) -> Self {
        if self.state != HandshakeState::Aborted {
            warn!(session = %self.session_id, role = ?self.role, from = %self.state, "session aborted");
        }
        self.ephemeral = None;
        self.session_key = None;
        self.state = HandshakeState::Aborted;
        self
    }

    fn key_material(&self) -> Option<(&SessionKey, &TranscriptHash)> {
        Some((self.session_key.as_ref()?, self.transcript_hash.as_ref()?))
    }

    /// Produce this side's confirmation.
    ///
    /// Initiator: `KeyDerived → AwaitingPeerConfirm`, emits KEY_CONFIRM_A.
    /// Responder: only once `Confirmed`, emits KEY_CONFIRM_B with no
    /// state change.
    pub fn send_confirm(self) -> Result<(Self, ConfirmPayload), Rejected> {
        let ready = match self.role {
            Role::Initiator => self.state == HandshakeState::KeyDerived,
            Role::Responder => self.state == HandshakeState::Confirmed,
        };
        if !ready {
            let msg = format!("{:?} cannot send confirmation in state {}", self.role, self.state);
            return Err(Rejected::new(self, SessionError::state(msg)));
        }

        let built = match self.key_material() {
            Some((key, th)) => build_key_confirm(
                self.role,
                self.session_id,
                &self.self_username,
                &self.peer_username,
                key,
                th,
            ),
            None => Err(SessionError::state("session key missing")),
        };
        let payload = match built {
            Ok(p) => p,
            Err(e) => return Err(Rejected::new(self, e)),
        };

        let ctx = match self.role {
            Role::Initiator => self.advance(HandshakeState::AwaitingPeerConfirm)?,
            Role::Responder => self,
        };
        debug!(session = %ctx.session_id, label = ctx.role.confirm_label(), "confirmation built");
        Ok((ctx, payload))
    }

    /// Verify the peer's confirmation and move to `Confirmed`.
    ///
    /// A responder that gets here must answer with [`Self::send_confirm`].
    pub fn accept_confirm(self, payload: &ConfirmPayload) -> Result<Self, Rejected> {
        if payload.session_id != self.session_id {
            return Err(Rejected::new(self, SessionError::state("confirmation for another session")));
        }
        if self.state != HandshakeState::AwaitingPeerConfirm {
            let msg = format!("unexpected {} in state {}", payload.role.confirm_label(), self.state);
            return Err(Rejected::new(self, SessionError::state(msg)));
        }
        match self.check_confirm(payload) {
            Ok(()) => self.advance(HandshakeState::Confirmed),
            Err(e) => Err(Rejected::new(self, e)),
        }
    }

    /// Whether `payload` is the peer's valid confirmation for this context.
    /// Changes nothing.
    pub(crate) fn confirms(&self, payload: &ConfirmPayload) -> bool {
        payload.session_id == self.session_id
            && self.state == HandshakeState::AwaitingPeerConfirm
            && self.check_confirm(payload).is_ok()
    }

    fn check_confirm(&self, payload: &ConfirmPayload) -> Result<(), SessionError> {
        if payload.role != self.role.peer() {
            return Err(SessionError::KeyConfirmation);
        }
        let (key, th) = self.key_material().ok_or(SessionError::KeyConfirmation)?;
        let claims = verify_key_confirm(payload, key, th)?;
        if claims.sender != self.peer_username || claims.receiver != self.self_username {
            return Err(SessionError::KeyConfirmation);
        }
        Ok(())
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("self_username", &self.self_username)
            .field("peer_username", &self.peer_username)
            .field("state", &self.state)
            .field("ephemeral", &self.ephemeral.as_ref().map(|_| "<redacted>"))
            .field("session_key", &self.session_key.as_ref().map(|_| "<redacted>"))
            .field("transcript_hash", &self.transcript_hash)
            .field("created_at", &self.created_at)
            .finish()
    }
}
