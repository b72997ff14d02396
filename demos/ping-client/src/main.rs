//! Connects to a Deusvent server, pings it a few times, and prints the
//! server-aligned clock.
//!
//! ```text
//! ping-client [ws://127.0.0.1:8080] [config.json]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::time::Duration;

use deusvent::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://127.0.0.1:8080";
const PINGS: usize = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let config = match args.next() {
        Some(path) => SessionConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };

    let keys = load_or_generate_keys(&MemoryStore::new()).await?;
    tracing::info!(%url, public_key = %keys.public_key, "connecting");

    let client = Client::builder()
        .config(config)
        .keys(keys)
        .connect(WebSocketConnector::new(url))?;
    client.wait_for(ConnectionState::Connected).await?;

    for attempt in 1..=PINGS {
        let offset_ms = client.sync_clock().await?;
        println!(
            "ping {attempt}/{PINGS}: offset {offset_ms} ms, server time {}",
            client.now()
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let decay = client.request(DecayQuery).await?;
    println!(
        "decay started at {}, lasts {}",
        decay.started_at, decay.length
    );

    client.disconnect().await;
    Ok(())
}
