//! Link layer - the underlying point-to-point transport
//!
//! A [`Link`] moves framed messages (header map + byte body) between
//! exactly two endpoints. The tunnel multiplexes logical connections over
//! a single link; how the link itself is implemented (raw sockets,
//! encryption, framing) is outside this crate's concern.

mod memory;

pub use memory::MemoryLink;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use thiserror::Error;

/// Header naming the sending endpoint's address. Populated by the link on
/// outgoing messages; the tunnel reads it to learn a peer's address on
/// first contact.
pub const HEADER_REMOTE: &str = "Remote";

/// Link layer errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("link closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// A framed wire message: a header map plus an opaque body.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Routing and application headers
    pub headers: HashMap<String, String>,
    /// Opaque payload
    pub body: Bytes,
}

impl Message {
    /// Create a message with an empty header map
    pub fn new(body: Bytes) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }
}

/// Trait for link implementations
#[async_trait]
pub trait Link: Send + Sync {
    /// Transmit one framed message; may fail.
    async fn send(&self, msg: Message) -> Result<(), LinkError>;

    /// Block until one framed message arrives or the link fails. A failure
    /// here is terminal for the link.
    async fn recv(&self) -> Result<Message, LinkError>;

    /// This endpoint's own address
    fn local(&self) -> String;

    /// The peer endpoint's address
    fn remote(&self) -> String;
}
