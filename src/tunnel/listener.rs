//! Listener - turns a bound socket's arriving traffic into acceptable
//! per-session connections
//!
//! The tunnel routes inbound messages by routing key only, so every
//! session dialed to one listen address lands in the same bound socket.
//! The accept loop fans those messages out by session identifier.

use super::socket::{Conn, Flag, Socket};
use super::TunnelError;
use crate::config::TunnelConfig;
use crate::link::HEADER_REMOTE;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

/// Accept side of a listen address.
pub struct Listener {
    addr: String,
    /// The listen-side socket this listener drains
    socket: Arc<Socket>,
    accept_rx: Mutex<mpsc::Receiver<Conn>>,
    /// Listener lifecycle, independent of the bound socket's
    closed: Flag,
}

impl Listener {
    pub(crate) fn new(addr: String, socket: Arc<Socket>, config: &TunnelConfig) -> Self {
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog);
        let closed = Flag::new();

        tokio::spawn(accept_loop(
            socket.clone(),
            accept_tx,
            closed.clone(),
            config.recv_queue,
        ));

        Self {
            addr,
            socket,
            accept_rx: Mutex::new(accept_rx),
            closed,
        }
    }

    /// Address this listener is bound to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Session identifier of the bound socket.
    pub fn session(&self) -> &str {
        self.socket.session()
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&self) -> Result<Conn, TunnelError> {
        let mut rx = self.accept_rx.lock().await;
        tokio::select! {
            conn = rx.recv() => conn.ok_or(TunnelError::Closed),
            _ = self.closed.wait() => Err(TunnelError::Closed),
        }
    }

    /// Stop the accept loop. The bound socket is left untouched.
    /// Idempotent.
    pub fn close(&self) {
        self.closed.set();
    }
}

/// Drain the bound socket and fan messages out to per-session
/// connections. New sessions are offered to the accept queue without
/// blocking; a full backlog drops the session.
async fn accept_loop(
    socket: Arc<Socket>,
    accept_tx: mpsc::Sender<Conn>,
    closed: Flag,
    recv_depth: usize,
) {
    let mut sessions: HashMap<String, Arc<Socket>> = HashMap::new();

    loop {
        let env = tokio::select! {
            res = socket.next() => match res {
                Ok(env) => env,
                Err(_) => {
                    debug!(key = %socket.key(), "bound socket closed, stopping accept loop");
                    return;
                }
            },
            _ = closed.wait() => return,
        };

        // known session: forward straight to its queue
        if let Some(conn) = sessions.get(&env.session).cloned() {
            if conn.is_closed() {
                sessions.remove(&env.session);
            } else if !conn.deliver(env) {
                trace!(key = %socket.key(), "session queue full, dropping message");
            }
            continue;
        }

        // new session: build a connection and offer it for accept
        let remote = env
            .message
            .headers
            .get(HEADER_REMOTE)
            .cloned()
            .unwrap_or_else(|| socket.remote());
        let session = env.session.clone();
        let conn = Socket::accepted(&socket, session.clone(), remote, recv_depth);
        conn.deliver(env);

        match accept_tx.try_send(Conn::new(conn.clone())) {
            Ok(()) => {
                sessions.insert(session, conn);
            }
            Err(_) => {
                trace!(key = %socket.key(), "accept backlog full, dropping session");
            }
        }
    }
}
