use ake_crypto::CryptoError;
use ake_proto::{ProtoError, SessionId};
use thiserror::Error;

/// Fault taxonomy for the handshake and message layer.
///
/// Every cryptographic verification failure is terminal for the affected
/// handshake or message. Nothing is ever returned as plaintext when a
/// verification step fails.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Signature verification failed on handshake message")]
    Authentication,

    #[error("Transcript mismatch (tampering or canonical-encoding bug)")]
    TranscriptMismatch,

    #[error("Key confirmation failed")]
    KeyConfirmation,

    #[error("Message decryption failed (wrong key, tampering, or altered metadata)")]
    Decryption,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("No public key known for {0:?}")]
    UnknownPeer(String),

    #[error("Protocol state fault: {0}")]
    ProtocolState(String),

    #[error("Replayed or regressed message: session {session_id} from {from} seq {msg_seq} <= {high_water}")]
    Replay {
        session_id: SessionId,
        from: String,
        msg_seq: u64,
        high_water: u64,
    },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// What the caller should do with the affected session after a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Verification failed: abandon the session and restart with fresh
    /// ephemeral keys and a new session id.
    AbortSession,
    /// Drop the offending message; the session (and the process) carry on.
    Discard,
}

impl SessionError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Authentication
            | Self::TranscriptMismatch
            | Self::KeyConfirmation
            | Self::Crypto(_) => Disposition::AbortSession,
            Self::Decryption
            | Self::MalformedMessage(_)
            | Self::UnknownPeer(_)
            | Self::ProtocolState(_)
            | Self::Replay { .. } => Disposition::Discard,
        }
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::ProtocolState(msg.into())
    }
}

impl From<ProtoError> for SessionError {
    fn from(e: ProtoError) -> Self {
        Self::MalformedMessage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_failures_abort_the_session() {
        for e in [
            SessionError::Authentication,
            SessionError::TranscriptMismatch,
            SessionError::KeyConfirmation,
            SessionError::Crypto(CryptoError::NonContributory),
        ] {
            assert_eq!(e.disposition(), Disposition::AbortSession, "{e}");
        }
    }

    #[test]
    fn message_level_faults_are_discarded() {
        for e in [
            SessionError::Decryption,
            SessionError::MalformedMessage("x".into()),
            SessionError::UnknownPeer("carol".into()),
            SessionError::state("late"),
        ] {
            assert_eq!(e.disposition(), Disposition::Discard, "{e}");
        }
    }

    #[test]
    fn proto_errors_become_malformed() {
        let e: SessionError = ProtoError::Malformed("bad".into()).into();
        assert!(matches!(e, SessionError::MalformedMessage(_)));
    }
}
