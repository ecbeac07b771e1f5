use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How message IVs are chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IvMode {
    /// Fresh random 96-bit IV per message.
    #[default]
    Random,
    /// IV derived from (session id, sender, msg_seq); unique as long as
    /// sequence numbers are never reused by a sender.
    Counter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandshakeSettings {
    /// Maximum accepted distance between a handshake body's timestamp and
    /// the local clock.
    pub max_clock_skew_secs: i64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self { max_clock_skew_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    pub handshake: HandshakeSettings,
    pub iv_mode: IvMode,
    /// Refuse to seal chat messages until the session reaches `Confirmed`.
    pub require_confirmed_to_send: bool,
    /// Reject envelopes whose msg_seq does not exceed the sender's high-water mark.
    pub replay_protection: bool,
    /// Envelopes held for a session whose key is not derived yet.
    pub max_deferred_per_session: usize,
    /// Closed (aborted or forgotten) sessions remembered so that a late copy
    /// of their KEY_INIT cannot reopen them. Oldest entries are evicted first.
    pub closed_session_memory: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake: HandshakeSettings::default(),
            iv_mode: IvMode::Random,
            require_confirmed_to_send: true,
            replay_protection: true,
            max_deferred_per_session: 32,
            closed_session_memory: 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SessionSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
