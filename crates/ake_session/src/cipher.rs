//! Chat message sealing under an established session key.
//!
//! AAD is recomputed from the envelope's own metadata on decrypt, so any
//! change to session id, sender, recipient or sequence number breaks the tag.

use ake_crypto::{aead, hash::sha256_framed, SessionKey};
use ake_proto::{
    envelope::associated_data, handshake::IV_LEN, validate_username, ChatMessageEnvelope,
    SessionId,
};
use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::{config::IvMode, error::SessionError};

const COUNTER_IV_DOMAIN: &[u8] = b"ake-iv-v1";

/// Ciphertext plus the metadata the envelope needs alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub timestamp: DateTime<Utc>,
}

impl SealedMessage {
    pub fn into_envelope(
        self,
        session_id: SessionId,
        from: &str,
        to: &str,
        msg_seq: u64,
    ) -> ChatMessageEnvelope {
        ChatMessageEnvelope {
            session_id,
            from: from.to_string(),
            to: to.to_string(),
            msg_seq,
            ciphertext: self.ciphertext,
            iv: self.iv,
            timestamp: self.timestamp,
        }
    }
}

/// Encrypt with a fresh random IV.
pub fn encrypt(
    session_key: &SessionKey,
    session_id: &SessionId,
    from: &str,
    to: &str,
    msg_seq: u64,
    plaintext: &[u8],
) -> Result<SealedMessage, SessionError> {
    encrypt_with(IvMode::Random, session_key, session_id, from, to, msg_seq, plaintext)
}

pub fn encrypt_with(
    iv_mode: IvMode,
    session_key: &SessionKey,
    session_id: &SessionId,
    from: &str,
    to: &str,
    msg_seq: u64,
    plaintext: &[u8],
) -> Result<SealedMessage, SessionError> {
    validate_username(from)?;
    validate_username(to)?;

    let iv = match iv_mode {
        IvMode::Random => aead::random_iv(),
        IvMode::Counter => counter_iv(session_id, from, msg_seq),
    };
    let aad = associated_data(session_id, from, to, msg_seq);
    let ciphertext = aead::encrypt(session_key.as_bytes(), &iv, plaintext, &aad)?;
    Ok(SealedMessage { ciphertext, iv, timestamp: Utc::now() })
}

/// Deterministic IV: first 12 bytes of
/// SHA-256("ake-iv-v1", session_id, sender, msg_seq).
pub fn counter_iv(session_id: &SessionId, from: &str, msg_seq: u64) -> [u8; IV_LEN] {
    let digest = sha256_framed(
        COUNTER_IV_DOMAIN,
        &[session_id.as_bytes(), from.as_bytes(), &msg_seq.to_be_bytes()],
    );
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&digest[..IV_LEN]);
    iv
}

/// Decrypt an envelope. Either the full plaintext or `Decryption`.
pub fn decrypt(
    session_key: &SessionKey,
    envelope: &ChatMessageEnvelope,
) -> Result<Zeroizing<Vec<u8>>, SessionError> {
    aead::decrypt(
        session_key.as_bytes(),
        &envelope.iv,
        &envelope.ciphertext,
        &envelope.associated_data(),
    )
    .map_err(|_| SessionError::Decryption)
}
