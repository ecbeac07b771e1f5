//! Key confirmation codec.
//!
//! Each side proves possession of the session key by AEAD-encrypting a
//! small canonical claim under it:
//!
//! ```text
//!   plaintext = canonical(label, session_id, sender, receiver)
//!   aad       = "ake-confirm-v1" || label || TH
//! ```
//!
//! `label` is `KEY_CONFIRM_A` (initiator) or `KEY_CONFIRM_B` (responder).
//! Because TH sits in the associated data, a peer that saw a different
//! transcript cannot produce or accept a valid confirmation.

use ake_crypto::{aead, SessionKey};
use ake_proto::{
    canonical::{CanonicalReader, CanonicalWriter, DOMAIN},
    ConfirmPayload, Role, SessionId,
};

use crate::{error::SessionError, transcript::TranscriptHash};

const CONFIRM_DOMAIN: &[u8] = b"ake-confirm-v1";

/// Authenticated content of a confirmation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmClaims {
    pub role: Role,
    pub session_id: SessionId,
    pub sender: String,
    pub receiver: String,
}

fn confirm_aad(role: Role, transcript_hash: &TranscriptHash) -> Vec<u8> {
    let label = role.confirm_label().as_bytes();
    let mut aad = Vec::with_capacity(CONFIRM_DOMAIN.len() + label.len() + 32);
    aad.extend_from_slice(CONFIRM_DOMAIN);
    aad.extend_from_slice(label);
    aad.extend_from_slice(transcript_hash.as_bytes());
    aad
}

fn claims_plaintext(role: Role, session_id: &SessionId, sender: &str, receiver: &str) -> Vec<u8> {
    let mut w = CanonicalWriter::new(DOMAIN);
    w.put_str(role.confirm_label())
        .put_bytes(session_id.as_bytes())
        .put_str(sender)
        .put_str(receiver);
    w.finish()
}

/// Build the confirmation `role` sends to its peer.
pub fn build_key_confirm(
    role: Role,
    session_id: SessionId,
    self_username: &str,
    peer_username: &str,
    session_key: &SessionKey,
    transcript_hash: &TranscriptHash,
) -> Result<ConfirmPayload, SessionError> {
    let plaintext = claims_plaintext(role, &session_id, self_username, peer_username);
    let iv = aead::random_iv();
    let ciphertext = aead::encrypt(
        session_key.as_bytes(),
        &iv,
        &plaintext,
        &confirm_aad(role, transcript_hash),
    )?;
    Ok(ConfirmPayload { session_id, role, iv, ciphertext })
}

/// Decrypt and parse a confirmation. Any failure, including a plaintext
/// whose label or session id disagrees with the payload header, is
/// `KeyConfirmation`.
pub fn verify_key_confirm(
    payload: &ConfirmPayload,
    session_key: &SessionKey,
    transcript_hash: &TranscriptHash,
) -> Result<ConfirmClaims, SessionError> {
    let plaintext = aead::decrypt(
        session_key.as_bytes(),
        &payload.iv,
        &payload.ciphertext,
        &confirm_aad(payload.role, transcript_hash),
    )
    .map_err(|_| SessionError::KeyConfirmation)?;

    let claims = parse_claims(&plaintext).ok_or(SessionError::KeyConfirmation)?;
    if claims.role != payload.role || claims.session_id != payload.session_id {
        return Err(SessionError::KeyConfirmation);
    }
    Ok(claims)
}

fn parse_claims(plaintext: &[u8]) -> Option<ConfirmClaims> {
    let mut r = CanonicalReader::new(plaintext, DOMAIN).ok()?;
    let role = match r.get_str().ok()? {
        "KEY_CONFIRM_A" => Role::Initiator,
        "KEY_CONFIRM_B" => Role::Responder,
        _ => return None,
    };
    let session_id = SessionId::from_bytes(r.get_bytes().ok()?.try_into().ok()?);
    let sender = r.get_str().ok()?.to_string();
    let receiver = r.get_str().ok()?.to_string();
    r.finish().ok()?;
    Some(ConfirmClaims { role, session_id, sender, receiver })
}
