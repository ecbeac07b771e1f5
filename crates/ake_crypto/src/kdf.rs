//! Key derivation functions
//!
//! `derive_session_key` — HKDF-SHA256 (extract-and-expand), turns the raw
//!   X25519 output plus both freshness nonces into the 256-bit session key.
//!
//! Both parties must feed bit-identical input:
//!   salt = nonce_a || nonce_b          (initiator's nonce first, always)
//!   ikm  = ECDH shared secret
//!   info = "ake-session-key-v1" || len(session_id) || session_id
//!                               || len(initiator) || initiator
//!                               || len(responder) || responder
//! Lengths are u32 big-endian, strings UTF-8.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{agreement::SharedSecret, error::CryptoError, hash::constant_time_eq};

pub const SESSION_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 32;

const SESSION_KEY_INFO: &[u8] = b"ake-session-key-v1";

// ── Session key ───────────────────────────────────────────────────────────────

/// 256-bit symmetric session key. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SessionKey {}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Binding context mixed into the HKDF `info` parameter.
#[derive(Debug, Clone, Copy)]
pub struct KdfContext<'a> {
    pub session_id: &'a [u8],
    pub initiator: &'a str,
    pub responder: &'a str,
}

impl KdfContext<'_> {
    fn info(&self) -> Vec<u8> {
        let mut info = Vec::with_capacity(
            SESSION_KEY_INFO.len() + 12 + self.session_id.len() + self.initiator.len() + self.responder.len(),
        );
        info.extend_from_slice(SESSION_KEY_INFO);
        for field in [self.session_id, self.initiator.as_bytes(), self.responder.as_bytes()] {
            info.extend_from_slice(&(field.len() as u32).to_be_bytes());
            info.extend_from_slice(field);
        }
        info
    }
}

// ── HKDF-SHA256 ───────────────────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF will use a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the session key. Identical inputs on both sides yield a
/// bit-identical key.
pub fn derive_session_key(
    shared_secret: &SharedSecret,
    nonce_a: &[u8; NONCE_LEN],
    nonce_b: &[u8; NONCE_LEN],
    context: &KdfContext<'_>,
) -> Result<SessionKey, CryptoError> {
    let mut salt = [0u8; NONCE_LEN * 2];
    salt[..NONCE_LEN].copy_from_slice(nonce_a);
    salt[NONCE_LEN..].copy_from_slice(nonce_b);

    let mut key = [0u8; SESSION_KEY_LEN];
    let res = hkdf_expand(shared_secret.as_bytes(), Some(&salt), &context.info(), &mut key);
    salt.zeroize();
    res?;
    Ok(SessionKey(key))
}

/// Generate a fresh random freshness nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}
