//! ake_crypto — cryptographic primitives for the authenticated key exchange
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - All public APIs return opaque newtypes to prevent accidental misuse.
//! - Pure functions only: no session state lives in this crate.
//!
//! # Module layout
//! - `identity`  — long-term Ed25519 identity keys, public key newtype, verification
//! - `agreement` — single-use X25519 ephemeral key pairs + ECDH
//! - `kdf`       — HKDF-SHA256 session key derivation
//! - `aead`      — AES-256-GCM encrypt/decrypt with 96-bit IVs
//! - `hash`      — SHA-256 helpers (digests, framed digests, constant-time compare)
//! - `error`     — unified error type

pub mod aead;
pub mod agreement;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;

pub use agreement::{EphemeralKeyPair, SharedSecret};
pub use error::CryptoError;
pub use identity::{IdentityKeyPair, PublicKeyBytes};
pub use kdf::SessionKey;
