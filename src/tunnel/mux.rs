//! Tunnel core: socket table, forwarding loops, dial and listen
//!
//! One send loop serializes all outbound traffic from every socket onto
//! the link; one receive loop demultiplexes inbound traffic back to the
//! owning socket's queue by routing key. Both loops run per connect cycle
//! and observe a shutdown flag created by [`Tunnel::connect`].

use super::envelope::Envelope;
use super::listener::Listener;
use super::socket::{Conn, Flag, Socket};
use super::TunnelError;
use crate::config::TunnelConfig;
use crate::link::{Link, HEADER_REMOTE};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, trace, warn};

type SocketTable = Arc<RwLock<HashMap<String, Arc<Socket>>>>;

/// Lifecycle state, guarded by one exclusive lock so concurrent
/// connect/close calls cannot race or double-start the loops.
#[derive(Default)]
struct State {
    connected: bool,
    shutdown: Option<Flag>,
}

/// A session-multiplexing tunnel over a single [`Link`].
pub struct Tunnel {
    link: Arc<dyn Link>,
    config: TunnelConfig,
    /// All sockets currently multiplexed on this link, by routing key
    sockets: SocketTable,
    /// Shared outbound queue: every socket's sole path to the link
    send_tx: mpsc::Sender<Envelope>,
    /// Consumer end, taken by the send loop for the span of each connect
    /// cycle; messages queued while disconnected stay buffered
    send_rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    state: Mutex<State>,
}

impl Tunnel {
    /// Create a tunnel over the given link with default queue sizing.
    pub fn new(link: Arc<dyn Link>) -> Self {
        Self::with_config(link, TunnelConfig::default())
    }

    /// Create a tunnel with explicit queue sizing.
    pub fn with_config(link: Arc<dyn Link>, config: TunnelConfig) -> Self {
        let (send_tx, send_rx) = mpsc::channel(config.send_queue);
        Self {
            link,
            config,
            sockets: Arc::new(RwLock::new(HashMap::new())),
            send_tx,
            send_rx: Arc::new(Mutex::new(send_rx)),
            state: Mutex::new(State::default()),
        }
    }

    /// Start the forwarding loops. Idempotent: connecting an already
    /// connected tunnel is a no-op.
    pub async fn connect(&self) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }

        let shutdown = Flag::new();
        state.shutdown = Some(shutdown.clone());
        state.connected = true;

        tokio::spawn(send_loop(
            self.link.clone(),
            self.send_rx.clone(),
            self.sockets.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(recv_loop(
            self.link.clone(),
            self.sockets.clone(),
            shutdown,
        ));

        Ok(())
    }

    /// Stop the loops and close every registered socket. Idempotent.
    pub async fn close(&self) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Ok(());
        }

        // close the sockets and drain the table in one pass so entries
        // cannot outlive the tunnel they belong to
        let drained: Vec<Arc<Socket>> = {
            let mut table = self.sockets.write().await;
            table.drain().map(|(_, socket)| socket).collect()
        };
        for socket in drained {
            socket.close();
        }

        if let Some(shutdown) = state.shutdown.take() {
            shutdown.set();
        }
        state.connected = false;

        Ok(())
    }

    /// Open an outbound connection to `addr`.
    ///
    /// Registers the socket and returns without waiting for any network
    /// activity. Dialing the same address twice replaces the earlier
    /// registration: the first connection keeps working for sends but no
    /// longer receives inbound traffic (last dial wins).
    pub async fn dial(&self, addr: &str) -> Result<Conn, TunnelError> {
        let socket = Socket::new(
            addr,
            self.link.local(),
            addr.to_string(),
            self.send_tx.clone(),
            self.config.recv_queue,
        );
        self.register(socket.clone()).await;
        Ok(Conn::new(socket))
    }

    /// Bind to `addr` and wait for the first message from some peer.
    ///
    /// Blocks until either the socket is closed (fails with
    /// [`TunnelError::SocketCreate`]) or a message carrying this address's
    /// routing key arrives; only then is the [`Listener`] constructed and
    /// its accept loop started.
    pub async fn listen(&self, addr: &str) -> Result<Listener, TunnelError> {
        let socket = Socket::new(
            addr,
            addr.to_string(),
            // placeholder, replaced by the first message's address header
            self.link.remote(),
            self.send_tx.clone(),
            self.config.recv_queue,
        );
        self.register(socket.clone()).await;

        tokio::select! {
            _ = socket.closed().wait() => Err(TunnelError::SocketCreate),
            _ = socket.gate().wait() => {
                Ok(Listener::new(addr.to_string(), socket, &self.config))
            }
        }
    }

    async fn register(&self, socket: Arc<Socket>) {
        let mut table = self.sockets.write().await;
        table.insert(socket.key().to_string(), socket);
    }
}

/// Serialize all outbound traffic through a single writer on the link.
async fn send_loop(
    link: Arc<dyn Link>,
    send_rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    sockets: SocketTable,
    shutdown: Flag,
) {
    // hold the consumer end for the whole connect cycle
    let mut rx = send_rx.lock().await;
    loop {
        tokio::select! {
            env = rx.recv() => {
                let Some(env) = env else { return };
                if let Err(e) = link.send(env.stamp()).await {
                    warn!(key = %env.key, error = %e, "link send failed");
                    let socket = sockets.read().await.get(&env.key).cloned();
                    if let Some(socket) = socket {
                        socket.set_fault(e.to_string());
                    }
                }
            }
            _ = shutdown.wait() => return,
        }
    }
}

/// Demultiplex inbound wire traffic to socket queues by routing key.
async fn recv_loop(link: Arc<dyn Link>, sockets: SocketTable, shutdown: Flag) {
    loop {
        let msg = tokio::select! {
            res = link.recv() => match res {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(error = %e, "link receive failed, stopping demultiplexer");
                    return;
                }
            },
            _ = shutdown.wait() => return,
        };

        let (key, session) = Envelope::unpack(&msg);

        let socket = sockets.read().await.get(&key).cloned();
        let Some(socket) = socket else {
            // traffic for a session this side never registered
            trace!(key = %key, "dropping message for unknown socket");
            continue;
        };

        // stale delivery: the socket was closed, purge its table entry
        if socket.is_closed() {
            sockets.write().await.remove(&key);
            continue;
        }

        // the first message a socket ever sees completes its handshake
        socket.connected(msg.headers.get(HEADER_REMOTE).map(String::as_str));

        let env = Envelope { key, session, message: msg };
        if !socket.deliver(env) {
            trace!(key = %socket.key(), "inbound queue full, dropping message");
        }
    }
}
