//! One party: an `Endpoint` wired to the relay.

use std::collections::VecDeque;

use ake_proto::{
    codec::{from_wire, to_wire},
    ChatMessageEnvelope,
};
use ake_session::{
    Delivered, Disposition, Endpoint, LocalIdentity, MemoryDirectory, Opened, Outbound, SessionRef,
};
use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::transport::{Frame, Posting};

pub enum Event {
    Confirmed(SessionRef),
    Message(Delivered),
}

pub struct Peer {
    endpoint: Endpoint<LocalIdentity, MemoryDirectory>,
    inbox: mpsc::UnboundedReceiver<String>,
    outbox: mpsc::UnboundedSender<Posting>,
    /// Messages released from deferral, not yet handed out.
    ready: VecDeque<Delivered>,
}

impl Peer {
    pub fn new(
        endpoint: Endpoint<LocalIdentity, MemoryDirectory>,
        inbox: mpsc::UnboundedReceiver<String>,
        outbox: mpsc::UnboundedSender<Posting>,
    ) -> Self {
        Self { endpoint, inbox, outbox, ready: VecDeque::new() }
    }

    pub fn name(&self) -> &str {
        self.endpoint.username()
    }

    pub fn initiate(&mut self, peer: &str) -> Result<SessionRef> {
        let out = self.endpoint.initiate(peer)?;
        let session = out.session();
        self.post_handshake(out)?;
        Ok(session)
    }

    pub fn send(&mut self, session: &SessionRef, text: &str) -> Result<u64> {
        let envelope = self.endpoint.seal(session, text.as_bytes())?;
        let msg_seq = envelope.msg_seq;
        let to = envelope.to.clone();
        self.post(to, &Frame::Chat(envelope))?;
        Ok(msg_seq)
    }

    fn post_handshake(&self, out: Outbound) -> Result<()> {
        self.post(out.to, &Frame::Handshake(out.message))
    }

    fn post(&self, to: String, frame: &Frame) -> Result<()> {
        let wire = to_wire(frame)?;
        self.outbox
            .send(Posting { to, wire })
            .map_err(|_| anyhow!("relay is gone"))
    }

    /// Wait for the next thing the caller cares about. Duplicates and other
    /// discardable frames are absorbed here.
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(delivered) = self.ready.pop_front() {
                return Ok(Event::Message(delivered));
            }
            let wire = self
                .inbox
                .recv()
                .await
                .ok_or_else(|| anyhow!("{}: inbox closed", self.name()))?;
            let frame: Frame = from_wire(&wire).context("undecodable frame")?;

            match frame {
                Frame::Handshake(message) => {
                    let progress = self.endpoint.handle(message)?;
                    for out in progress.outbound {
                        self.post_handshake(out)?;
                    }
                    if let Some(session) = progress.key_ready {
                        self.release_deferred(&session)?;
                    }
                    if let Some(session) = progress.confirmed {
                        info!(party = self.name(), %session, "handshake complete");
                        return Ok(Event::Confirmed(session));
                    }
                }
                Frame::Chat(envelope) => {
                    if let Some(delivered) = self.open(envelope)? {
                        return Ok(Event::Message(delivered));
                    }
                }
            }
        }
    }

    /// `None` for envelopes that are deferred or discarded.
    fn open(&mut self, envelope: ChatMessageEnvelope) -> Result<Option<Delivered>> {
        match self.endpoint.open(envelope) {
            Ok(Opened::Message(delivered)) => Ok(Some(delivered)),
            Ok(Opened::Deferred) => Ok(None),
            Err(e) if e.disposition() == Disposition::Discard => {
                debug!(party = self.name(), error = %e, "envelope discarded");
                Ok(None)
            }
            Err(e) => {
                warn!(party = self.name(), error = %e, "envelope rejected");
                Err(e.into())
            }
        }
    }

    fn release_deferred(&mut self, session: &SessionRef) -> Result<()> {
        for envelope in self.endpoint.take_deferred(session) {
            if let Some(delivered) = self.open(envelope)? {
                self.ready.push_back(delivered);
            }
        }
        Ok(())
    }
}
