//! Hash utilities
//!
//! - SHA-256 digests for transcript hashing and derived IVs
//! - Constant-time comparison for secrets and digests

use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// SHA-256 over several parts, each prefixed with its u32 big-endian length
/// so that part boundaries cannot be shifted.
pub fn sha256_framed(domain: &[u8], parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Constant-time comparison to prevent timing side channels.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_separates_parts() {
        let a = sha256_framed(b"d", &[b"ab", b"c"]);
        let b = sha256_framed(b"d", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn framed_is_order_sensitive() {
        assert_ne!(sha256_framed(b"d", &[b"x", b"y"]), sha256_framed(b"d", &[b"y", b"x"]));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
