//! Handshake wire types.
//!
//! Four messages, in protocol order:
//!
//! ```text
//!   initiator                                responder
//!   KEY_INIT      { body, sig_IK_A(body) }  ──▶
//!                                           ◀──  KEY_RESP { body, sig_IK_B(body) }
//!   KEY_CONFIRM_A { AEAD_SK(..), aad = TH }  ──▶
//!                                           ◀──  KEY_CONFIRM_B { AEAD_SK(..), aad = TH }
//! ```
//!
//! Bodies are signed over their canonical encoding (see `canonical`), never
//! over the JSON form. The transcript hash TH covers canonical(KEY_INIT body)
//! followed by canonical(KEY_RESP body).

use serde::{Deserialize, Serialize};

use crate::{
    canonical::{CanonicalWriter, DOMAIN},
    codec::{b64, b64_array},
    error::ProtoError,
    session_id::SessionId,
    validate_username,
};

pub const PROTOCOL_VERSION: u8 = 1;
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 32;
pub const IV_LEN: usize = 12;

const TAG_KEY_INIT: u8 = 0x01;
const TAG_KEY_RESP: u8 = 0x02;

// ── Roles ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }

    /// Label of the confirmation message this role sends.
    pub fn confirm_label(self) -> &'static str {
        match self {
            Self::Initiator => "KEY_CONFIRM_A",
            Self::Responder => "KEY_CONFIRM_B",
        }
    }
}

// ── Bodies ───────────────────────────────────────────────────────────────────

/// Signed body of KEY_INIT, built by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInitBody {
    pub version: u8,
    pub session_id: SessionId,
    pub initiator: String,
    pub responder: String,
    /// Initiator's ephemeral X25519 public key.
    #[serde(with = "b64_array")]
    pub ephemeral_public: [u8; KEY_LEN],
    /// nonce_a
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_LEN],
    /// Unix milliseconds, sender clock.
    pub timestamp: i64,
}

/// Signed body of KEY_RESP, built by the responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRespBody {
    pub version: u8,
    pub session_id: SessionId,
    pub initiator: String,
    pub responder: String,
    /// Responder's ephemeral X25519 public key.
    #[serde(with = "b64_array")]
    pub ephemeral_public: [u8; KEY_LEN],
    /// nonce_b
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_LEN],
    pub timestamp: i64,
}

#[allow(clippy::too_many_arguments)]
fn encode_body(
    tag: u8,
    version: u8,
    session_id: &SessionId,
    initiator: &str,
    responder: &str,
    ephemeral_public: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    timestamp: i64,
) -> Vec<u8> {
    let mut w = CanonicalWriter::new(DOMAIN);
    w.put_u8(tag)
        .put_u8(version)
        .put_bytes(session_id.as_bytes())
        .put_str(initiator)
        .put_str(responder)
        .put_bytes(ephemeral_public)
        .put_bytes(nonce)
        .put_i64(timestamp);
    w.finish()
}

fn validate_common(version: u8, initiator: &str, responder: &str) -> Result<(), ProtoError> {
    if version != PROTOCOL_VERSION {
        return Err(ProtoError::Malformed(format!("unsupported protocol version {version}")));
    }
    validate_username(initiator)?;
    validate_username(responder)?;
    if initiator == responder {
        return Err(ProtoError::Malformed("initiator and responder are the same user".into()));
    }
    Ok(())
}

impl KeyInitBody {
    /// Bytes covered by the initiator's signature and the transcript hash.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        encode_body(
            TAG_KEY_INIT,
            self.version,
            &self.session_id,
            &self.initiator,
            &self.responder,
            &self.ephemeral_public,
            &self.nonce,
            self.timestamp,
        )
    }

    pub fn validate(&self) -> Result<(), ProtoError> {
        validate_common(self.version, &self.initiator, &self.responder)
    }
}

impl KeyRespBody {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        encode_body(
            TAG_KEY_RESP,
            self.version,
            &self.session_id,
            &self.initiator,
            &self.responder,
            &self.ephemeral_public,
            &self.nonce,
            self.timestamp,
        )
    }

    pub fn validate(&self) -> Result<(), ProtoError> {
        validate_common(self.version, &self.initiator, &self.responder)
    }
}

/// A body together with the sender's long-term signature over its canonical
/// encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<B> {
    pub body: B,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

// ── Confirmation ─────────────────────────────────────────────────────────────

/// AEAD-protected key confirmation. `role` is the sender's role and is bound
/// into the associated data together with the transcript hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayload {
    pub session_id: SessionId,
    pub role: Role,
    #[serde(with = "b64_array")]
    pub iv: [u8; IV_LEN],
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

// ── Tagged message ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMessage {
    KeyInit {
        body: KeyInitBody,
        #[serde(with = "b64")]
        signature: Vec<u8>,
    },
    KeyResp {
        body: KeyRespBody,
        #[serde(with = "b64")]
        signature: Vec<u8>,
    },
    KeyConfirmA(ConfirmPayload),
    KeyConfirmB(ConfirmPayload),
}

impl ProtocolMessage {
    pub fn key_init(signed: Signed<KeyInitBody>) -> Self {
        Self::KeyInit { body: signed.body, signature: signed.signature }
    }

    pub fn key_resp(signed: Signed<KeyRespBody>) -> Self {
        Self::KeyResp { body: signed.body, signature: signed.signature }
    }

    /// Wrap a confirmation payload in the variant matching its sender role.
    pub fn confirm(payload: ConfirmPayload) -> Self {
        match payload.role {
            Role::Initiator => Self::KeyConfirmA(payload),
            Role::Responder => Self::KeyConfirmB(payload),
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::KeyInit { body, .. } => body.session_id,
            Self::KeyResp { body, .. } => body.session_id,
            Self::KeyConfirmA(p) | Self::KeyConfirmB(p) => p.session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyInit { .. } => "KEY_INIT",
            Self::KeyResp { .. } => "KEY_RESP",
            Self::KeyConfirmA(_) => "KEY_CONFIRM_A",
            Self::KeyConfirmB(_) => "KEY_CONFIRM_B",
        }
    }
}
