//! Ports to the long-term identity layer.
//!
//! The handshake only needs two capabilities from the surrounding
//! application: signing with the local long-term key, and looking up a
//! peer's long-term public key by username. A key returned by
//! [`KeyDirectory::lookup_public_key`] is treated as authentic.

use std::collections::HashMap;

use ake_crypto::{CryptoError, IdentityKeyPair, PublicKeyBytes};

/// Signs with the caller's long-term private key. The key never crosses
/// this boundary.
pub trait IdentityAccess {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Resolves usernames to long-term public keys.
pub trait KeyDirectory {
    fn lookup_public_key(&self, username: &str) -> Option<PublicKeyBytes>;
}

/// In-process identity backed by an Ed25519 key pair.
#[derive(Debug)]
pub struct LocalIdentity {
    username: String,
    keypair: IdentityKeyPair,
}

impl LocalIdentity {
    pub fn new(username: impl Into<String>, keypair: IdentityKeyPair) -> Self {
        Self { username: username.into(), keypair }
    }

    pub fn generate(username: impl Into<String>) -> Self {
        Self::new(username, IdentityKeyPair::generate())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.keypair.public
    }
}

impl IdentityAccess for LocalIdentity {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.keypair.sign(msg))
    }
}

/// Username → public key map.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    keys: HashMap<String, PublicKeyBytes>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, username: impl Into<String>, key: PublicKeyBytes) {
        self.keys.insert(username.into(), key);
    }

    pub fn with(mut self, username: impl Into<String>, key: PublicKeyBytes) -> Self {
        self.insert(username, key);
        self
    }
}

impl KeyDirectory for MemoryDirectory {
    fn lookup_public_key(&self, username: &str) -> Option<PublicKeyBytes> {
        self.keys.get(username).copied()
    }
}

impl<T: KeyDirectory + ?Sized> KeyDirectory for &T {
    fn lookup_public_key(&self, username: &str) -> Option<PublicKeyBytes> {
        (**self).lookup_public_key(username)
    }
}
