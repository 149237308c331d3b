use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use switchboard_proto::{
    connect_url, generate_request_id, sign_challenge, HostBoundFrame, ServiceResponse,
    HOST_TERMINAL_ID, METHOD_LIST_TERMINALS,
};

#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(about = "Multi-tenant terminal routing hub and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect as a terminal and print the tenant's registry snapshot
    Inspect {
        /// Hub URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        /// URL-safe base64 32-byte signing seed for the tenant key
        #[arg(short, long)]
        seed: String,

        /// Terminal id to present
        #[arg(short, long, default_value = "inspector")]
        terminal_id: String,
    },
}

/// Debug client: authenticate with the given seed, call ListTerminals on
/// the host terminal, and pretty-print the snapshot.
pub async fn run_inspect(url: String, seed: String, terminal_id: String) -> Result<()> {
    let seed_bytes: [u8; 32] = URL_SAFE_NO_PAD
        .decode(seed.trim())
        .context("seed is not valid base64")?
        .try_into()
        .map_err(|_| anyhow!("seed must decode to exactly 32 bytes"))?;
    let (public_key, signature) = sign_challenge(&seed_bytes);
    let ws_url = connect_url(&url, &public_key, &terminal_id, &signature);

    let (ws_stream, _) = timeout(Duration::from_secs(5), connect_async(&ws_url))
        .await
        .context("connection timed out - is the hub running?")?
        .context("connection failed")?;
    let (mut write, mut read) = ws_stream.split();

    let request = HostBoundFrame {
        target_terminal_id: HOST_TERMINAL_ID.to_string(),
        id: generate_request_id(),
        method: Some(METHOD_LIST_TERMINALS.to_string()),
        payload: serde_json::json!({}),
    };
    let request_id = request.id.clone();
    write
        .send(Message::Text(serde_json::to_string(&request)?.into()))
        .await?;

    let response = timeout(Duration::from_secs(5), async {
        while let Some(msg) = read.next().await {
            if let Message::Text(text) = msg? {
                let response: ServiceResponse = match serde_json::from_str(&text) {
                    Ok(response) => response,
                    Err(_) => continue,
                };
                if response.id == request_id {
                    return Ok::<_, anyhow::Error>(response);
                }
            }
        }
        Err(anyhow!("connection closed before a response arrived"))
    })
    .await
    .context("timed out waiting for the registry snapshot")??;

    if let Some(error) = response.error {
        return Err(anyhow!("hub answered with an error: {error}"));
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&response.payload.unwrap_or_default())?
    );
    Ok(())
}
