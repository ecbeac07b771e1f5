//! Canonical byte encoding.
//!
//! Signatures and the transcript hash are computed over these bytes, never
//! over JSON, so the result is independent of serde field order, whitespace,
//! or map iteration order.
//!
//! Format:
//!   [ domain tag ] [ fields... ]
//!   u8 / u64 / i64   fixed width, big-endian
//!   bytes / str      u32 BE length prefix || raw bytes (str is UTF-8)

use crate::error::ProtoError;

pub const DOMAIN: &[u8] = b"ake-v1\x00";

#[derive(Debug, Default)]
pub struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    pub fn new(domain: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(domain);
        Self { buf }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(v);
        self
    }

    pub fn put_str(&mut self, v: &str) -> &mut Self {
        self.put_bytes(v.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads back what `CanonicalWriter` produced. Every accessor fails on
/// truncated input; `finish` fails on trailing bytes.
#[derive(Debug)]
pub struct CanonicalReader<'a> {
    buf: &'a [u8],
}

impl<'a> CanonicalReader<'a> {
    pub fn new(buf: &'a [u8], domain: &[u8]) -> Result<Self, ProtoError> {
        let rest = buf
            .strip_prefix(domain)
            .ok_or_else(|| ProtoError::Malformed("canonical domain tag mismatch".into()))?;
        Ok(Self { buf: rest })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtoError> {
        if self.buf.len() < n {
            return Err(ProtoError::Malformed("truncated canonical encoding".into()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtoError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bytes(&mut self) -> Result<&'a [u8], ProtoError> {
        let mut len = [0u8; 4];
        len.copy_from_slice(self.take(4)?);
        self.take(u32::from_be_bytes(len) as usize)
    }

    pub fn get_str(&mut self) -> Result<&'a str, ProtoError> {
        std::str::from_utf8(self.get_bytes()?)
            .map_err(|_| ProtoError::Malformed("invalid UTF-8 in canonical string".into()))
    }

    pub fn finish(self) -> Result<(), ProtoError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtoError::Malformed("trailing bytes after canonical encoding".into()))
        }
    }
}
