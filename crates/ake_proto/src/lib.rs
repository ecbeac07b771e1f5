//! ake_proto — Wire types, canonical encoding, and serialisation for the
//! authenticated key exchange and the chat transport built on top of it.
//!
//! All on-wire types serialise to JSON with binary fields base64-encoded and
//! carry a protocol version so the format can evolve.
//!
//! # Modules
//! - `session_id` — 128-bit random session / conversation identifier
//! - `canonical`  — byte-stable encoding used for signatures and transcripts
//! - `handshake`  — KEY_INIT / KEY_RESP bodies, confirmation payloads, `ProtocolMessage`
//! - `envelope`   — encrypted chat message envelope (what the transport sees)
//! - `codec`      — JSON framing + base64 serde helpers
//! - `error`      — decode / validation errors

pub mod canonical;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod session_id;

pub use envelope::ChatMessageEnvelope;
pub use error::ProtoError;
pub use handshake::{
    ConfirmPayload, KeyInitBody, KeyRespBody, ProtocolMessage, Role, Signed, PROTOCOL_VERSION,
};
pub use session_id::SessionId;

/// Usernames are embedded in `|`-separated associated data and in canonical
/// encodings, so they must be non-empty, bounded, and free of `|` and
/// control characters.
pub fn validate_username(name: &str) -> Result<(), ProtoError> {
    const MAX_USERNAME_LEN: usize = 256;
    if name.is_empty() {
        return Err(ProtoError::Malformed("empty username".into()));
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(ProtoError::Malformed(format!(
            "username longer than {MAX_USERNAME_LEN} bytes"
        )));
    }
    if name.chars().any(|c| c == '|' || c.is_control()) {
        return Err(ProtoError::Malformed(format!("username {name:?} contains a reserved character")));
    }
    Ok(())
}
