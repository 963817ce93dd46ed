//! Loopback demo
//!
//! Runs two tunnels over an in-process link pair and drives a number of
//! echo round trips through a dialed connection:
//! - the server side listens on an address, accepts the arriving session
//!   and echoes every message back
//! - the client side dials the same address and measures the round trips

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use muxlink::link::MemoryLink;
use muxlink::{Message, Tunnel};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Echo round trips through a session-multiplexing tunnel
#[derive(Parser, Debug)]
#[command(name = "loopback")]
#[command(about = "Echo round trips through a session-multiplexing tunnel")]
#[command(version)]
struct Args {
    /// Number of round trips
    #[arg(short = 'n', long, default_value_t = 8)]
    messages: usize,

    /// Payload size in bytes
    #[arg(short, long, default_value_t = 64)]
    payload: usize,

    /// Address to multiplex on
    #[arg(short, long, default_value = "echo.svc:7000")]
    addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let (near, far) = MemoryLink::pair("node-a:1", "node-b:1");
    let client = Tunnel::new(Arc::new(near));
    let server = Arc::new(Tunnel::new(Arc::new(far)));

    client.connect().await?;
    server.connect().await?;

    // the server blocks in listen() until the client's first message
    let echo_addr = args.addr.clone();
    let server_tunnel = server.clone();
    let server_task = tokio::spawn(async move {
        let listener = server_tunnel.listen(&echo_addr).await?;
        let conn = listener.accept().await?;
        debug!(remote = %conn.remote(), session = %conn.session(), "accepted session");
        while let Ok(msg) = conn.recv().await {
            conn.send(msg).await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    // let listen register its socket; traffic for an unregistered key is
    // silently dropped
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let conn = client.dial(&args.addr).await?;
    info!(addr = %args.addr, key = %conn.key(), "dialed");

    let payload = Bytes::from(vec![0x55u8; args.payload]);
    let started = Instant::now();
    for i in 0..args.messages {
        conn.send(Message::new(payload.clone())).await?;
        let reply = conn.recv().await.context("echo reply")?;
        debug!(i, len = reply.body.len(), "round trip");
    }
    info!(
        count = args.messages,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "all round trips completed"
    );

    conn.close();
    client.close().await?;
    server.close().await?;
    server_task.abort();

    Ok(())
}
