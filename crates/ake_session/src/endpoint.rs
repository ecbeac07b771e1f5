//! One party's view of all its sessions.
//!
//! `Endpoint` owns the local identity, a key directory and a map of
//! in-flight and established sessions. A session is named by the other
//! party together with the session id ([`SessionRef`]): ids travel in the
//! clear, so a third party reusing someone else's id gets a session of its
//! own instead of taking that one over. Messages and envelopes are accepted
//! in any order and any number of times, which is what an unordered
//! at-least-once transport delivers.
//!
//! Verification failures remove the session and come back as `Err`.
//! Everything else that cannot be used (duplicates, stale or misrouted
//! messages) is logged, reported in [`Progress::discarded`] and dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use ake_proto::{
    ChatMessageEnvelope, ConfirmPayload, KeyInitBody, KeyRespBody, ProtocolMessage, Role,
    SessionId,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    cipher,
    config::SessionSettings,
    context::{HandshakeState, Rejected, SessionContext},
    error::{Disposition, SessionError},
    handshake::Handshake,
    identity::{IdentityAccess, KeyDirectory},
    replay::ReplayGuard,
};

/// A session as one endpoint sees it: the other party and the session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionRef {
    pub peer: String,
    pub session_id: SessionId,
}

impl SessionRef {
    pub fn new(peer: impl Into<String>, session_id: SessionId) -> Self {
        Self { peer: peer.into(), session_id }
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.session_id, self.peer)
    }
}

/// A protocol message to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: String,
    pub message: ProtocolMessage,
}

impl Outbound {
    /// The session this message belongs to, from the sender's side.
    pub fn session(&self) -> SessionRef {
        SessionRef::new(self.to.clone(), self.message.session_id())
    }
}

/// Result of feeding one protocol message to [`Endpoint::handle`].
#[derive(Debug, Default)]
pub struct Progress {
    pub outbound: Vec<Outbound>,
    pub discarded: Vec<SessionError>,
    /// Set when this message made a session key available.
    pub key_ready: Option<SessionRef>,
    /// Set when this message completed key confirmation.
    pub confirmed: Option<SessionRef>,
}

impl Progress {
    fn discard(&mut self, error: SessionError) {
        warn!(%error, "message discarded");
        self.discarded.push(error);
    }
}

/// A decrypted chat message.
#[derive(Debug)]
pub struct Delivered {
    pub session_id: SessionId,
    pub from: String,
    pub msg_seq: u64,
    pub timestamp: DateTime<Utc>,
    pub plaintext: Zeroizing<Vec<u8>>,
}

impl Delivered {
    /// The session to reply in.
    pub fn session(&self) -> SessionRef {
        SessionRef::new(self.from.clone(), self.session_id)
    }
}

#[derive(Debug)]
pub enum Opened {
    Message(Delivered),
    /// Held until the session key exists; see [`Endpoint::take_deferred`].
    Deferred,
}

/// Recently closed sessions, oldest evicted first.
#[derive(Debug)]
struct ClosedSessions {
    order: VecDeque<SessionRef>,
    members: HashSet<SessionRef>,
    capacity: usize,
}

impl ClosedSessions {
    fn new(capacity: usize) -> Self {
        Self { order: VecDeque::new(), members: HashSet::new(), capacity }
    }

    fn insert(&mut self, session: SessionRef) {
        if self.capacity == 0 || !self.members.insert(session.clone()) {
            return;
        }
        self.order.push_back(session);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn contains(&self, session: &SessionRef) -> bool {
        self.members.contains(session)
    }
}

pub struct Endpoint<I: IdentityAccess, D: KeyDirectory> {
    username: String,
    identity: I,
    directory: D,
    settings: SessionSettings,
    sessions: HashMap<SessionRef, SessionContext>,
    /// KEY_INIT bodies this endpoint sent, needed to process KEY_RESP.
    sent_inits: HashMap<SessionRef, KeyInitBody>,
    next_seq: HashMap<SessionRef, u64>,
    deferred: HashMap<SessionRef, VecDeque<ChatMessageEnvelope>>,
    closed: ClosedSessions,
    replay: ReplayGuard,
}

impl<I: IdentityAccess, D: KeyDirectory> Endpoint<I, D> {
    pub fn new(
        username: impl Into<String>,
        identity: I,
        directory: D,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let username = username.into();
        ake_proto::validate_username(&username)?;
        let closed = ClosedSessions::new(settings.closed_session_memory);
        Ok(Self {
            username,
            identity,
            directory,
            settings,
            sessions: HashMap::new(),
            sent_inits: HashMap::new(),
            next_seq: HashMap::new(),
            deferred: HashMap::new(),
            closed,
            replay: ReplayGuard::new(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn session(&self, session: &SessionRef) -> Option<&SessionContext> {
        self.sessions.get(session)
    }

    pub fn state(&self, session: &SessionRef) -> Option<HandshakeState> {
        self.sessions.get(session).map(SessionContext::state)
    }

    pub fn session_refs(&self) -> impl Iterator<Item = &SessionRef> {
        self.sessions.keys()
    }

    /// Drop a session and everything kept for it. The session cannot be
    /// reopened by a repeated KEY_INIT afterwards.
    pub fn forget(&mut self, session: &SessionRef) -> Option<SessionContext> {
        self.sent_inits.remove(session);
        self.next_seq.remove(session);
        self.deferred.remove(session);
        self.replay.forget(&session.session_id, &session.peer);
        self.closed.insert(session.clone());
        self.sessions.remove(session)
    }

    /// Open a new session with `peer`. The returned KEY_INIT goes to the
    /// transport.
    pub fn initiate(&mut self, peer: &str) -> Result<Outbound, SessionError> {
        if self.directory.lookup_public_key(peer).is_none() {
            return Err(SessionError::UnknownPeer(peer.to_string()));
        }
        let (init, ctx) =
            Handshake::new(&self.identity, &self.settings.handshake).start(&self.username, peer)?;
        let session = SessionRef::new(peer, ctx.session_id());
        self.sent_inits.insert(session.clone(), init.body.clone());
        self.sessions.insert(session.clone(), ctx);
        info!(%session, "handshake initiated");
        Ok(Outbound { to: peer.to_string(), message: ProtocolMessage::key_init(init) })
    }

    /// Feed one protocol message.
    pub fn handle(&mut self, message: ProtocolMessage) -> Result<Progress, SessionError> {
        let mut progress = Progress::default();
        debug!(kind = message.kind(), session = %message.session_id(), "handling protocol message");
        match message {
            ProtocolMessage::KeyInit { body, signature } => {
                self.on_key_init(&body, &signature, &mut progress)?
            }
            ProtocolMessage::KeyResp { body, signature } => {
                self.on_key_resp(&body, &signature, &mut progress)?
            }
            ProtocolMessage::KeyConfirmA(payload) => {
                self.on_confirm(Role::Initiator, &payload, &mut progress)?
            }
            ProtocolMessage::KeyConfirmB(payload) => {
                self.on_confirm(Role::Responder, &payload, &mut progress)?
            }
        }
        Ok(progress)
    }

    fn on_key_init(
        &mut self,
        body: &KeyInitBody,
        signature: &[u8],
        progress: &mut Progress,
    ) -> Result<(), SessionError> {
        let session = SessionRef::new(body.initiator.clone(), body.session_id);
        if self.sessions.contains_key(&session) {
            progress.discard(SessionError::state(format!("duplicate KEY_INIT for session {session}")));
            return Ok(());
        }
        if self.closed.contains(&session) {
            progress.discard(SessionError::state(format!("KEY_INIT for closed session {session}")));
            return Ok(());
        }
        let Some(initiator_key) = self.directory.lookup_public_key(&body.initiator) else {
            progress.discard(SessionError::UnknownPeer(body.initiator.clone()));
            return Ok(());
        };

        let handled = Handshake::new(&self.identity, &self.settings.handshake).handle_key_init(
            body,
            signature,
            &initiator_key,
            &self.username,
        );
        match handled {
            Ok((resp, ctx)) => {
                self.sessions.insert(session.clone(), ctx);
                progress.outbound.push(Outbound {
                    to: body.initiator.clone(),
                    message: ProtocolMessage::key_resp(resp),
                });
                info!(%session, "handshake accepted");
                progress.key_ready = Some(session);
                Ok(())
            }
            Err(e) if e.disposition() == Disposition::Discard => {
                progress.discard(e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn on_key_resp(
        &mut self,
        body: &KeyRespBody,
        signature: &[u8],
        progress: &mut Progress,
    ) -> Result<(), SessionError> {
        let session = SessionRef::new(body.responder.clone(), body.session_id);
        let Some(init_body) = self.sent_inits.get(&session).cloned() else {
            progress.discard(SessionError::state(format!(
                "KEY_RESP for session {session} not initiated here"
            )));
            return Ok(());
        };
        let Some(ctx) = self.sessions.remove(&session) else {
            progress.discard(SessionError::state(format!("KEY_RESP for unknown session {session}")));
            return Ok(());
        };
        let Some(responder_key) = self.directory.lookup_public_key(&session.peer) else {
            let peer = session.peer.clone();
            return self.settle(session, Rejected::new(ctx, SessionError::UnknownPeer(peer)), progress);
        };

        let handled = Handshake::new(&self.identity, &self.settings.handshake).handle_key_resp(
            body,
            signature,
            &responder_key,
            &init_body,
            ctx,
        );
        let ctx = match handled {
            Ok((_derived, ctx)) => ctx,
            Err(rejected) => return self.settle(session, rejected, progress),
        };
        progress.key_ready = Some(session.clone());

        match ctx.send_confirm() {
            Ok((ctx, payload)) => {
                self.sessions.insert(session, ctx);
                progress.outbound.push(Outbound {
                    to: body.responder.clone(),
                    message: ProtocolMessage::confirm(payload),
                });
                Ok(())
            }
            Err(rejected) => self.settle(session, rejected, progress),
        }
    }

    /// The session a confirmation belongs to. Confirmations carry no sender,
    /// so when several peers share the session id the one whose key opens
    /// the payload wins.
    fn confirm_target(&self, payload: &ConfirmPayload) -> Result<SessionRef, SessionError> {
        let mut candidates: Vec<&SessionRef> = self
            .sessions
            .keys()
            .filter(|session| session.session_id == payload.session_id)
            .collect();
        match candidates.len() {
            0 => Err(SessionError::state(format!(
                "confirmation for unknown session {}",
                payload.session_id
            ))),
            1 => Ok(candidates.remove(0).clone()),
            n => candidates
                .into_iter()
                .find(|session| self.sessions.get(*session).is_some_and(|ctx| ctx.confirms(payload)))
                .cloned()
                .ok_or_else(|| {
                    SessionError::state(format!(
                        "confirmation for session {} matches none of {n} peers",
                        payload.session_id
                    ))
                }),
        }
    }

    fn on_confirm(
        &mut self,
        label_role: Role,
        payload: &ConfirmPayload,
        progress: &mut Progress,
    ) -> Result<(), SessionError> {
        if payload.role != label_role {
            progress.discard(SessionError::MalformedMessage(format!(
                "{} carries a {:?} confirmation",
                label_role.confirm_label(),
                payload.role
            )));
            return Ok(());
        }
        let session = match self.confirm_target(payload) {
            Ok(session) => session,
            Err(e) => {
                progress.discard(e);
                return Ok(());
            }
        };
        let Some(ctx) = self.sessions.remove(&session) else {
            progress.discard(SessionError::state(format!("confirmation for unknown session {session}")));
            return Ok(());
        };

        let ctx = match ctx.accept_confirm(payload) {
            Ok(ctx) => ctx,
            Err(rejected) => return self.settle(session, rejected, progress),
        };

        let ctx = if ctx.role() == Role::Responder {
            match ctx.send_confirm() {
                Ok((ctx, reply)) => {
                    progress.outbound.push(Outbound {
                        to: session.peer.clone(),
                        message: ProtocolMessage::confirm(reply),
                    });
                    ctx
                }
                Err(rejected) => return self.settle(session, rejected, progress),
            }
        } else {
            ctx
        };

        self.sessions.insert(session.clone(), ctx);
        info!(%session, "session confirmed");
        progress.confirmed = Some(session);
        Ok(())
    }

    /// Put a rejected context back, or drop the session if it aborted.
    fn settle(
        &mut self,
        session: SessionRef,
        rejected: Rejected,
        progress: &mut Progress,
    ) -> Result<(), SessionError> {
        let (ctx, error) = rejected.into_parts();
        match error.disposition() {
            Disposition::Discard => {
                self.sessions.insert(session, ctx);
                progress.discard(error);
                Ok(())
            }
            Disposition::AbortSession => {
                warn!(%session, %error, "session dropped after verification failure");
                self.forget(&session);
                Err(error)
            }
        }
    }

    /// Encrypt `plaintext` for the peer of `session`.
    pub fn seal(
        &mut self,
        session: &SessionRef,
        plaintext: &[u8],
    ) -> Result<ChatMessageEnvelope, SessionError> {
        let ctx = self
            .sessions
            .get(session)
            .ok_or_else(|| SessionError::state(format!("unknown session {session}")))?;
        if self.settings.require_confirmed_to_send && !ctx.is_confirmed() {
            return Err(SessionError::state(format!(
                "session {session} not confirmed (state {})",
                ctx.state()
            )));
        }
        let key = ctx
            .session_key()
            .ok_or_else(|| SessionError::state(format!("session {session} has no key yet")))?;

        let msg_seq = self.next_seq.get(session).copied().unwrap_or(1);
        let following = msg_seq
            .checked_add(1)
            .ok_or_else(|| SessionError::state("message sequence exhausted"))?;

        let session_id = session.session_id;
        let sealed = cipher::encrypt_with(
            self.settings.iv_mode,
            key,
            &session_id,
            &self.username,
            &session.peer,
            msg_seq,
            plaintext,
        )?;
        let envelope = sealed.into_envelope(session_id, &self.username, &session.peer, msg_seq);
        self.next_seq.insert(session.clone(), following);
        debug!(%session, msg_seq, "message sealed");
        Ok(envelope)
    }

    /// Authenticate and decrypt an incoming envelope.
    pub fn open(&mut self, envelope: ChatMessageEnvelope) -> Result<Opened, SessionError> {
        envelope.validate()?;
        if envelope.to != self.username {
            return Err(SessionError::MalformedMessage(format!(
                "envelope addressed to {:?}",
                envelope.to
            )));
        }
        let session = SessionRef::new(envelope.from.clone(), envelope.session_id);
        let Some(ctx) = self.sessions.get(&session) else {
            return Err(SessionError::state(format!("envelope for unknown session {session}")));
        };

        let Some(key) = ctx.session_key() else {
            if ctx.state() == HandshakeState::Aborted {
                return Err(SessionError::state(format!("session {session} aborted")));
            }
            let queue = self.deferred.entry(session.clone()).or_default();
            if queue.len() >= self.settings.max_deferred_per_session {
                return Err(SessionError::state(format!(
                    "deferral queue for session {session} is full"
                )));
            }
            queue.push_back(envelope);
            debug!(%session, queued = queue.len(), "envelope deferred until key derivation");
            return Ok(Opened::Deferred);
        };

        let plaintext = cipher::decrypt(key, &envelope).map_err(|e| {
            warn!(%session, msg_seq = envelope.msg_seq, "envelope failed authentication");
            e
        })?;
        if self.settings.replay_protection {
            self.replay
                .check_and_record(&session.session_id, &session.peer, envelope.msg_seq)
                .map_err(|error| {
                    warn!(%error, "replayed envelope rejected");
                    error
                })?;
        }

        Ok(Opened::Message(Delivered {
            session_id: session.session_id,
            from: session.peer,
            msg_seq: envelope.msg_seq,
            timestamp: envelope.timestamp,
            plaintext,
        }))
    }

    /// Envelopes parked by [`Self::open`], once the session key exists.
    /// Feed them back through `open`.
    pub fn take_deferred(&mut self, session: &SessionRef) -> Vec<ChatMessageEnvelope> {
        let ready = self
            .sessions
            .get(session)
            .is_some_and(|ctx| ctx.state().has_key());
        if !ready {
            return Vec::new();
        }
        self.deferred
            .remove(session)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{LocalIdentity, MemoryDirectory};

    fn pair() -> (Endpoint<LocalIdentity, MemoryDirectory>, Endpoint<LocalIdentity, MemoryDirectory>) {
        let alice = LocalIdentity::generate("alice");
        let bob = LocalIdentity::generate("bob");
        let dir = MemoryDirectory::new()
            .with("alice", alice.public_key())
            .with("bob", bob.public_key());
        (
            Endpoint::new("alice", alice, dir.clone(), SessionSettings::default()).unwrap(),
            Endpoint::new("bob", bob, dir, SessionSettings::default()).unwrap(),
        )
    }

    #[test]
    fn initiate_requires_known_peer() {
        let (mut alice, _) = pair();
        assert!(matches!(alice.initiate("carol"), Err(SessionError::UnknownPeer(_))));
    }

    #[test]
    fn seal_is_gated_until_confirmed() {
        let (mut alice, mut bob) = pair();
        let out = alice.initiate("bob").unwrap();
        let at_bob = SessionRef::new("alice", out.message.session_id());
        let progress = bob.handle(out.message).unwrap();
        assert_eq!(progress.key_ready, Some(at_bob.clone()));

        // Bob has a key but no confirmation yet.
        assert_eq!(bob.state(&at_bob), Some(HandshakeState::AwaitingPeerConfirm));
        assert!(matches!(bob.seal(&at_bob, b"early"), Err(SessionError::ProtocolState(_))));
    }

    #[test]
    fn forget_removes_everything() {
        let (mut alice, _) = pair();
        let out = alice.initiate("bob").unwrap();
        let session = out.session();
        assert!(alice.forget(&session).is_some());
        assert!(alice.session(&session).is_none());
        assert_eq!(alice.session_refs().count(), 0);
    }

    #[test]
    fn endpoint_rejects_invalid_username() {
        let id = LocalIdentity::generate("a|b");
        assert!(Endpoint::new("a|b", id, MemoryDirectory::new(), SessionSettings::default()).is_err());
    }

    #[test]
    fn closed_sessions_evict_oldest() {
        let refs: Vec<_> = (0..3u8)
            .map(|i| SessionRef::new("alice", SessionId::from_bytes([i; 16])))
            .collect();
        let mut closed = ClosedSessions::new(2);
        for r in &refs {
            closed.insert(r.clone());
        }
        closed.insert(refs[2].clone());
        assert!(!closed.contains(&refs[0]));
        assert!(closed.contains(&refs[1]));
        assert!(closed.contains(&refs[2]));
        assert_eq!(closed.order.len(), 2);

        let mut disabled = ClosedSessions::new(0);
        disabled.insert(refs[0].clone());
        assert!(!disabled.contains(&refs[0]));
    }

    #[test]
    fn session_ref_display() {
        let r = SessionRef::new("bob", SessionId::from_bytes([0xab; 16]));
        assert_eq!(r.to_string(), format!("{}@bob", "ab".repeat(16)));
    }
}
