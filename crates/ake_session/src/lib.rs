//! ake_session — Handshake state machine, key confirmation and message
//! cipher for the four-message authenticated key exchange.
//!
//! # Modules
//! - `identity`   — `IdentityAccess` / `KeyDirectory` ports and in-memory implementations
//! - `transcript` — transcript hash over the canonical KEY_INIT and KEY_RESP bodies
//! - `confirm`    — KEY_CONFIRM_A / KEY_CONFIRM_B construction and verification
//! - `context`    — `SessionContext`, `HandshakeState` and confirmation transitions
//! - `handshake`  — `Handshake`: start, handle KEY_INIT, handle KEY_RESP
//! - `cipher`     — chat message encryption under the session key
//! - `replay`     — per-sender `msg_seq` high-water mark
//! - `endpoint`   — keyed session map driving all of the above for one party
//! - `config`     — `SessionSettings`
//! - `error`      — `SessionError` taxonomy
//!
//! The core performs no I/O and persists nothing; callers own transport and
//! storage of contexts and history.

pub mod cipher;
pub mod config;
pub mod confirm;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod replay;
pub mod transcript;

pub use config::{HandshakeSettings, IvMode, SessionSettings};
pub use confirm::{build_key_confirm, verify_key_confirm, ConfirmClaims};
pub use context::{HandshakeState, Rejected, SessionContext};
pub use endpoint::{Delivered, Endpoint, Opened, Outbound, Progress, SessionRef};
pub use error::{Disposition, SessionError};
pub use handshake::{DerivedSession, Handshake};
pub use identity::{IdentityAccess, KeyDirectory, LocalIdentity, MemoryDirectory};
pub use replay::ReplayGuard;
pub use transcript::{TranscriptHash, TranscriptLedger};
