//! Two local parties run the key exchange over a relay that reorders and
//! duplicates frames, then trade a few stop-and-wait chat messages.

mod peer;
mod transport;

use std::path::PathBuf;
use std::time::Duration;

use ake_session::{Endpoint, LocalIdentity, MemoryDirectory, SessionSettings};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::peer::{Event, Peer};
use crate::transport::Relay;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authenticated key exchange demo", long_about = None)]
struct Cli {
    /// JSON settings file; defaults apply to anything it leaves out
    #[arg(long)]
    config: Option<PathBuf>,
    /// Chat messages alice sends once the session is confirmed
    #[arg(long, default_value_t = 3)]
    messages: usize,
    /// Probability that the relay delivers a frame twice
    #[arg(long, default_value_t = 0.3)]
    duplicate_rate: f64,
    /// Seed for the relay's shuffling
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ake_demo=info,ake_session=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => SessionSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => SessionSettings::default(),
    };
    debug!(?settings, "session settings");

    let alice_id = LocalIdentity::generate("alice");
    let bob_id = LocalIdentity::generate("bob");
    info!(fingerprint = %alice_id.public_key().fingerprint(), "alice identity");
    info!(fingerprint = %bob_id.public_key().fingerprint(), "bob identity");

    let directory = MemoryDirectory::new()
        .with("alice", alice_id.public_key())
        .with("bob", bob_id.public_key());

    let mut relay = Relay::new(cli.duplicate_rate, cli.seed);
    let (outbox, relay_rx) = mpsc::unbounded_channel();
    let alice = Peer::new(
        Endpoint::new("alice", alice_id, directory.clone(), settings.clone())?,
        relay.register("alice"),
        outbox.clone(),
    );
    let bob = Peer::new(
        Endpoint::new("bob", bob_id, directory, settings)?,
        relay.register("bob"),
        outbox,
    );
    let relay_task = tokio::spawn(relay.run(relay_rx));

    let conversation = async {
        let alice_task = tokio::spawn(run_initiator(alice, "bob".to_string(), cli.messages));
        let bob_task = tokio::spawn(run_responder(bob, cli.messages));
        alice_task.await??;
        bob_task.await??;
        Ok::<_, anyhow::Error>(())
    };
    tokio::time::timeout(Duration::from_secs(cli.timeout_secs), conversation)
        .await
        .map_err(|_| anyhow!("conversation did not finish within {}s", cli.timeout_secs))??;

    let stats = relay_task.await?;
    info!(
        delivered = stats.delivered,
        duplicated = stats.duplicated,
        dropped = stats.dropped,
        "relay finished"
    );
    Ok(())
}

async fn run_initiator(mut peer: Peer, responder: String, messages: usize) -> Result<()> {
    let session = peer.initiate(&responder)?;
    loop {
        if let Event::Confirmed(confirmed) = peer.next_event().await? {
            if confirmed == session {
                break;
            }
        }
    }

    for i in 1..=messages {
        let msg_seq = peer.send(&session, &format!("message {i} from {}", peer.name()))?;
        info!(party = peer.name(), msg_seq, "sent");
        // Stop-and-wait: the next message goes out only after this one is acked.
        loop {
            if let Event::Message(reply) = peer.next_event().await? {
                info!(
                    party = peer.name(),
                    from = %reply.from,
                    text = %String::from_utf8_lossy(&reply.plaintext),
                    "reply"
                );
                break;
            }
        }
    }
    Ok(())
}

async fn run_responder(mut peer: Peer, messages: usize) -> Result<()> {
    let mut received = 0;
    while received < messages {
        match peer.next_event().await? {
            Event::Confirmed(_) => {}
            Event::Message(msg) => {
                info!(
                    party = peer.name(),
                    from = %msg.from,
                    msg_seq = msg.msg_seq,
                    text = %String::from_utf8_lossy(&msg.plaintext),
                    "received"
                );
                peer.send(&msg.session(), &format!("ack {}", msg.msg_seq))?;
                received += 1;
            }
        }
    }
    Ok(())
}
