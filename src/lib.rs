//! # muxlink
//!
//! A session-multiplexing tunnel: one point-to-point [`Link`] carries many
//! independent, connection-like channels. Callers [`Tunnel::dial`] an
//! address to open an outbound logical connection, or [`Tunnel::listen`]
//! on an address to wait for and accept inbound ones; both hand back a
//! [`Conn`] that sends and receives opaque framed messages.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Application                       │
//! │              (dial / listen / accept)                │
//! ├─────────────────────────────────────────────────────┤
//! │                   Tunnel Layer                       │
//! │    (socket table, send loop, receive loop, keys)     │
//! ├─────────────────────────────────────────────────────┤
//! │                    Link Layer                        │
//! │     (one duplex transport between two endpoints)     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every connection is identified on the wire by a routing key (the hex
//! SHA-256 digest of its address) and a per-instance session identifier,
//! both stamped as headers on each outgoing message. Inbound traffic is
//! demultiplexed back to the owning connection by routing key.

pub mod config;
pub mod link;
pub mod tunnel;

pub use config::Config;
pub use link::{Link, LinkError, Message};
pub use tunnel::{Conn, Listener, Tunnel, TunnelError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link error: {0}")]
    Link(#[from] link::LinkError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
