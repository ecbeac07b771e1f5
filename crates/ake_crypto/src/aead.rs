//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM.
//! Key size: 32 bytes.  IV: 12 bytes (96-bit).  Tag: 16 bytes (appended).
//!
//! The IV is carried next to the ciphertext by the caller (envelope `iv`
//! field); it is not prepended here.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Fresh random 96-bit IV from the OS CSPRNG.
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt `plaintext` under a 32-byte key.
/// `aad` — additional associated data (authenticated but not encrypted).
pub fn encrypt(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)
}

/// Decrypt `ciphertext || tag`. Nothing is returned unless the tag verifies.
pub fn decrypt(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn roundtrip() {
        let iv = random_iv();
        let ct = encrypt(&KEY, &iv, b"attack at dawn", b"aad").unwrap();
        assert_eq!(ct.len(), 14 + TAG_LEN);
        let pt = decrypt(&KEY, &iv, &ct, b"aad").unwrap();
        assert_eq!(pt.as_slice(), b"attack at dawn");
    }

    #[test]
    fn wrong_aad_fails() {
        let iv = random_iv();
        let ct = encrypt(&KEY, &iv, b"msg", b"aad-1").unwrap();
        assert!(matches!(decrypt(&KEY, &iv, &ct, b"aad-2"), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn wrong_key_fails() {
        let iv = random_iv();
        let ct = encrypt(&KEY, &iv, b"msg", b"").unwrap();
        assert!(decrypt(&[0x43; 32], &iv, &ct, b"").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let iv = random_iv();
        let mut ct = encrypt(&KEY, &iv, b"msg", b"").unwrap();
        ct[0] ^= 0x01;
        assert!(decrypt(&KEY, &iv, &ct, b"").is_err());
    }

    #[test]
    fn short_input_fails() {
        assert!(decrypt(&KEY, &random_iv(), &[0u8; 8], b"").is_err());
    }
}
