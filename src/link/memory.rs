//! In-process link backed by channels
//!
//! Connects two endpoints inside one process. Stands in for a real wire in
//! the test suite and the loopback demo.

use super::{Link, LinkError, Message, HEADER_REMOTE};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// Depth of the per-direction channel between the two endpoints.
const WIRE_DEPTH: usize = 1024;

/// One endpoint of an in-process link pair.
pub struct MemoryLink {
    local: String,
    remote: String,
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl MemoryLink {
    /// Create a connected pair of endpoints with the given addresses.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (MemoryLink, MemoryLink) {
        let a = a.into();
        let b = b.into();
        let (a_tx, b_rx) = mpsc::channel(WIRE_DEPTH);
        let (b_tx, a_rx) = mpsc::channel(WIRE_DEPTH);
        (
            MemoryLink {
                local: a.clone(),
                remote: b.clone(),
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            MemoryLink {
                local: b,
                remote: a,
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&self, mut msg: Message) -> Result<(), LinkError> {
        // the receiving side learns who sent the message from this header
        msg.headers
            .entry(HEADER_REMOTE.to_string())
            .or_insert_with(|| self.local.clone());
        self.tx.send(msg).await.map_err(|_| LinkError::Closed)
    }

    async fn recv(&self) -> Result<Message, LinkError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(LinkError::Closed)
    }

    fn local(&self) -> String {
        self.local.clone()
    }

    fn remote(&self) -> String {
        self.remote.clone()
    }
}
