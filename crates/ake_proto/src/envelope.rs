//! Encrypted chat message envelope — what the transport and storage see.
//!
//! The transport is untrusted and only needs:
//!   - session_id (conversation routing)
//!   - from / to  (delivery)
//!   - msg_seq    (sender-chosen, strictly increasing per (session_id, from))
//!   - iv + ciphertext (opaque bytes)
//!   - timestamp  (display / retention)
//!
//! `(session_id, from, to, msg_seq)` is bound into the AEAD tag as associated
//! data, so a relay or storage layer cannot reassign sender, recipient,
//! session, or sequence without the message failing to decrypt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{b64, b64_array},
    error::ProtoError,
    handshake::IV_LEN,
    session_id::SessionId,
    validate_username,
};

/// On-wire envelope for one chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageEnvelope {
    pub session_id: SessionId,
    pub from: String,
    pub to: String,
    pub msg_seq: u64,
    /// AES-256-GCM ciphertext with the 16-byte tag appended.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub iv: [u8; IV_LEN],
    pub timestamp: DateTime<Utc>,
}

impl ChatMessageEnvelope {
    /// Associated data recomputed from the envelope's own metadata.
    pub fn associated_data(&self) -> Vec<u8> {
        associated_data(&self.session_id, &self.from, &self.to, self.msg_seq)
    }

    pub fn validate(&self) -> Result<(), ProtoError> {
        validate_username(&self.from)?;
        validate_username(&self.to)?;
        if self.ciphertext.is_empty() {
            return Err(ProtoError::Malformed("empty ciphertext".into()));
        }
        Ok(())
    }
}

/// UTF-8 `sessionId|from|to|msgSeq`, session id in lowercase hex and
/// `msg_seq` in decimal. Usernames are validated to exclude `|`.
pub fn associated_data(session_id: &SessionId, from: &str, to: &str, msg_seq: u64) -> Vec<u8> {
    format!("{session_id}|{from}|{to}|{msg_seq}").into_bytes()
}
