//! Transcript ledger.
//!
//! TH = SHA-256( "ake-transcript-v1"
//!               || len(canonical(init)) || canonical(init)
//!               || len(canonical(resp)) || canonical(resp) )
//!
//! The init body always comes first, whichever party computes the hash.
//! Binding both bodies together means a genuine KEY_INIT cannot be paired
//! with a substituted KEY_RESP without the two sides disagreeing on TH.

use std::fmt;

use ake_crypto::hash::{constant_time_eq, sha256_framed, DIGEST_LEN};
use ake_proto::{KeyInitBody, KeyRespBody};

const TRANSCRIPT_DOMAIN: &[u8] = b"ake-transcript-v1";

#[derive(Clone, Copy)]
pub struct TranscriptHash([u8; DIGEST_LEN]);

impl TranscriptHash {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl PartialEq for TranscriptHash {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for TranscriptHash {}

impl fmt::Debug for TranscriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TranscriptHash({})", hex::encode(&self.0[..8]))
    }
}

pub struct TranscriptLedger;

impl TranscriptLedger {
    pub fn hash(init: &KeyInitBody, resp: &KeyRespBody) -> TranscriptHash {
        Self::hash_canonical(&init.canonical_bytes(), &resp.canonical_bytes())
    }

    /// Hash already-canonical encodings, in protocol order.
    pub fn hash_canonical(init_canonical: &[u8], resp_canonical: &[u8]) -> TranscriptHash {
        TranscriptHash(sha256_framed(TRANSCRIPT_DOMAIN, &[init_canonical, resp_canonical]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ake_proto::{SessionId, PROTOCOL_VERSION};

    fn bodies() -> (KeyInitBody, KeyRespBody) {
        let sid = SessionId::from_bytes([5; 16]);
        let init = KeyInitBody {
            version: PROTOCOL_VERSION,
            session_id: sid,
            initiator: "alice".into(),
            responder: "bob".into(),
            ephemeral_public: [1; 32],
            nonce: [2; 32],
            timestamp: 10,
        };
        let resp = KeyRespBody {
            version: PROTOCOL_VERSION,
            session_id: sid,
            initiator: "alice".into(),
            responder: "bob".into(),
            ephemeral_public: [3; 32],
            nonce: [4; 32],
            timestamp: 11,
        };
        (init, resp)
    }

    #[test]
    fn pure_and_reproducible() {
        let (init, resp) = bodies();
        assert_eq!(TranscriptLedger::hash(&init, &resp), TranscriptLedger::hash(&init.clone(), &resp.clone()));
    }

    #[test]
    fn order_sensitive() {
        let (init, resp) = bodies();
        let forward = TranscriptLedger::hash_canonical(&init.canonical_bytes(), &resp.canonical_bytes());
        let swapped = TranscriptLedger::hash_canonical(&resp.canonical_bytes(), &init.canonical_bytes());
        assert_ne!(forward, swapped);
    }

    #[test]
    fn substituted_resp_changes_hash() {
        let (init, resp) = bodies();
        let mut other = resp.clone();
        other.ephemeral_public = [9; 32];
        assert_ne!(TranscriptLedger::hash(&init, &resp), TranscriptLedger::hash(&init, &other));
    }

    #[test]
    fn debug_shows_only_a_prefix() {
        let th = TranscriptHash::from_bytes([0xab; DIGEST_LEN]);
        assert_eq!(format!("{th:?}"), format!("TranscriptHash({})", "ab".repeat(8)));
    }
}
