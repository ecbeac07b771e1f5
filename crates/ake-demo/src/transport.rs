//! In-process relay standing in for an untrusted network.
//!
//! Frames travel as JSON text. The relay batches whatever is pending,
//! shuffles the batch and may deliver any frame twice, so parties see
//! unordered at-least-once delivery.

use std::collections::HashMap;
use std::time::Duration;

use ake_proto::{ChatMessageEnvelope, ProtocolMessage};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Everything a party can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    Handshake(ProtocolMessage),
    Chat(ChatMessageEnvelope),
}

#[derive(Debug, Clone)]
pub struct Posting {
    pub to: String,
    pub wire: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: usize,
    pub duplicated: usize,
    pub dropped: usize,
}

pub struct Relay {
    inboxes: HashMap<String, mpsc::UnboundedSender<String>>,
    duplicate_rate: f64,
    batch_window: Duration,
    rng: StdRng,
}

impl Relay {
    pub fn new(duplicate_rate: f64, seed: Option<u64>) -> Self {
        Self {
            inboxes: HashMap::new(),
            duplicate_rate: if duplicate_rate.is_finite() { duplicate_rate.clamp(0.0, 1.0) } else { 0.0 },
            batch_window: Duration::from_millis(5),
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    /// Create the inbox for `name`.
    pub fn register(&mut self, name: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(name.to_string(), tx);
        rx
    }

    /// Deliver postings until every sender has gone away.
    pub async fn run(mut self, mut outbox: mpsc::UnboundedReceiver<Posting>) -> RelayStats {
        let mut stats = RelayStats::default();
        while let Some(first) = outbox.recv().await {
            let mut batch = vec![first];
            tokio::time::sleep(self.batch_window).await;
            while let Ok(next) = outbox.try_recv() {
                batch.push(next);
            }

            let mut deliveries = Vec::with_capacity(batch.len() * 2);
            for posting in batch {
                if self.rng.gen_bool(self.duplicate_rate) {
                    stats.duplicated += 1;
                    deliveries.push(posting.clone());
                }
                deliveries.push(posting);
            }
            deliveries.shuffle(&mut self.rng);
            debug!(frames = deliveries.len(), "relay flushing batch");

            for Posting { to, wire } in deliveries {
                match self.inboxes.get(&to) {
                    Some(inbox) if inbox.send(wire).is_ok() => stats.delivered += 1,
                    _ => {
                        trace!(%to, "recipient gone, frame dropped");
                        stats.dropped += 1;
                    }
                }
            }
        }
        stats
    }
}
