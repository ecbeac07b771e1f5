//! Per-sender high-water mark on `msg_seq`.
//!
//! Only consulted after an envelope authenticated, so a forged envelope can
//! never move the mark.

use std::collections::HashMap;

use ake_proto::SessionId;

use crate::error::SessionError;

#[derive(Debug, Default)]
pub struct ReplayGuard {
    high_water: HashMap<(SessionId, String), u64>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence number accepted so far from `from` in this session.
    pub fn high_water(&self, session_id: &SessionId, from: &str) -> Option<u64> {
        self.high_water.get(&(*session_id, from.to_string())).copied()
    }

    pub fn check(&self, session_id: &SessionId, from: &str, msg_seq: u64) -> Result<(), SessionError> {
        match self.high_water(session_id, from) {
            Some(high_water) if msg_seq <= high_water => Err(SessionError::Replay {
                session_id: *session_id,
                from: from.to_string(),
                msg_seq,
                high_water,
            }),
            _ => Ok(()),
        }
    }

    pub fn check_and_record(
        &mut self,
        session_id: &SessionId,
        from: &str,
        msg_seq: u64,
    ) -> Result<(), SessionError> {
        self.check(session_id, from, msg_seq)?;
        self.high_water.insert((*session_id, from.to_string()), msg_seq);
        Ok(())
    }

    pub fn forget(&mut self, session_id: &SessionId, from: &str) {
        self.high_water.remove(&(*session_id, from.to_string()));
    }
}
