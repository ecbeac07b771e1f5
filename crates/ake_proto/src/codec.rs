//! Wire codec — JSON framing and base64 helpers.
//!
//! Binary fields (`ciphertext`, `iv`, ephemeral keys, nonces, signatures)
//! are carried as standard-alphabet base64 strings so envelopes survive any
//! text transport. Anything that fails to decode is a malformed message;
//! the caller discards it.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ProtoError;

/// Serialise a wire value to its JSON text form.
pub fn to_wire<T: Serialize>(value: &T) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(value)?)
}

/// Parse a wire value from JSON text.
pub fn from_wire<T: DeserializeOwned>(text: &str) -> Result<T, ProtoError> {
    serde_json::from_str(text).map_err(|e| ProtoError::Malformed(e.to_string()))
}

/// `#[serde(with = "b64")]` for `Vec<u8>`.
pub mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(de::Error::custom)
    }
}

/// `#[serde(with = "b64_array")]` for fixed-size `[u8; N]`.
pub mod b64_array {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(s).map_err(de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| de::Error::custom(format!("expected {N} bytes, got {len}")))
    }
}
