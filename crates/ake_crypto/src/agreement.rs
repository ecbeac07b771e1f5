//! X25519 key agreement.
//!
//! References:
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!
//! An `EphemeralKeyPair` is generated fresh for every handshake attempt and
//! is consumed by value in [`EphemeralKeyPair::agree`]. The type system
//! therefore guarantees one agreement per ephemeral key; the secret scalar
//! is zeroized when it is consumed or dropped (x25519-dalek `zeroize`).

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};

use crate::error::CryptoError;

pub const EPHEMERAL_PUBLIC_LEN: usize = 32;

/// Single-use X25519 key pair.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519Public,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; EPHEMERAL_PUBLIC_LEN] {
        self.public.to_bytes()
    }

    /// Compute the ECDH shared secret with the peer's ephemeral public key.
    ///
    /// Consumes the key pair. Rejects low-order peer points, which would
    /// yield an all-zero (non-contributory) secret.
    pub fn agree(self, peer_public: &[u8; EPHEMERAL_PUBLIC_LEN]) -> Result<SharedSecret, CryptoError> {
        let shared = self.secret.diffie_hellman(&X25519Public::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(SharedSecret(shared))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Raw ECDH output. Only ever fed into the KDF; zeroized on drop.
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let alice = EphemeralKeyPair::generate();
        let bob = EphemeralKeyPair::generate();
        let alice_pub = alice.public_bytes();
        let bob_pub = bob.public_bytes();

        let s1 = alice.agree(&bob_pub).unwrap();
        let s2 = bob.agree(&alice_pub).unwrap();
        assert_eq!(s1.as_bytes(), s2.as_bytes());
    }

    #[test]
    fn fresh_pairs_differ() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        assert_ne!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn rejects_low_order_point() {
        let alice = EphemeralKeyPair::generate();
        let err = alice.agree(&[0u8; 32]);
        assert!(matches!(err, Err(CryptoError::NonContributory)));
    }
}
