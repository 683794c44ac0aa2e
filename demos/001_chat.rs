//! Chat room listener.
//!
//! Demonstrates:
//! - Opening a client with a connection-type preference
//! - Subscribing and publishing
//! - Consuming messages as a stream until Ctrl+C
//!
//! Usage:
//!   cargo run --example 001_chat
//!   cargo run --example 001_chat -- --url http://localhost:8080/cometd
//!   cargo run --example 001_chat -- --long-polling --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::Context;
use bayeux_client::{Client, ConnectionType};
use common::Args;
use futures_util::StreamExt;
use serde_json::json;

// ============================================================================
// Constants
// ============================================================================

const CHANNEL: &str = "/chat/demo";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== 001: Chat ===\n");

    // ========================================================================
    // Open Client
    // ========================================================================

    println!("[1] Opening client...");
    println!("    URL: {}", args.url);

    let mut builder = Client::builder(&args.url).connection_timeout(Some(Duration::from_secs(30)));
    if args.long_polling {
        builder = builder.connection_type(ConnectionType::LongPolling);
    }
    let client = builder.build().context("invalid client configuration")?;

    client.open().await.context("failed to open client")?;
    if let Some(connection_type) = client.connection_type() {
        println!("    ✓ Connected over {connection_type}\n");
    }

    // ========================================================================
    // Subscribe and Publish
    // ========================================================================

    println!("[2] Subscribing to {CHANNEL}...");
    client.subscribe(CHANNEL).await?;
    println!("    ✓ Subscriptions: {:?}\n", client.subscriptions());

    println!("[3] Publishing greeting...");
    client
        .publish(CHANNEL, json!({ "user": "demo", "text": "hello" }))
        .await?;
    println!("    ✓ Published\n");

    // ========================================================================
    // Receive
    // ========================================================================

    println!("[4] Waiting for messages (Ctrl+C to exit)...");

    let mut messages = Box::pin(client.messages());
    loop {
        tokio::select! {
            message = messages.next() => match message {
                Some(message) => {
                    let message = message?;
                    println!("    {} {}", message.channel, message.data.unwrap_or_default());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    drop(messages);

    // ========================================================================
    // Cleanup
    // ========================================================================

    println!("\n[Cleanup] Closing client...");
    client.close().await;
    println!("          ✓ Done");

    Ok(())
}
