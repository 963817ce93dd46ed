//! Socket - a logical, address-keyed pseudo-connection
//!
//! Sockets share one outbound queue owned by the tunnel and each own a
//! private inbound queue fed by the tunnel's receive loop. The public
//! surface is [`Conn`], a cheap handle over a shared socket.

use super::envelope::Envelope;
use super::TunnelError;
use crate::link::Message;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

/// One-shot broadcast flag: set at most once, queryable and awaitable by
/// any number of tasks.
#[derive(Debug, Clone)]
pub(crate) struct Flag(Arc<watch::Sender<bool>>);

impl Flag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Set the flag. Returns false if it was already set.
    pub fn set(&self) -> bool {
        self.0.send_if_modified(|v| {
            if *v {
                false
            } else {
                *v = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Derive the routing key for an address: the hex SHA-256 digest of the
/// address, or of a fresh random identifier when no address is given.
pub(crate) fn routing_key(addr: &str) -> String {
    let input = if addr.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        addr.to_string()
    };
    let digest = ring::digest::digest(&ring::digest::SHA256, input.as_bytes());
    hex::encode(digest.as_ref())
}

/// A logical pseudo-connection multiplexed over the link.
pub(crate) struct Socket {
    /// Routing key: stable for the socket's lifetime, used as the table
    /// slot and on the wire
    key: String,
    /// Fresh per-instance identifier, stamped on every outgoing message
    session: String,
    local: String,
    /// Learned from the first inbound message on the listen side
    remote: RwLock<String>,
    /// Clone of the tunnel's shared outbound queue
    send_tx: mpsc::Sender<Envelope>,
    /// Private inbound queue: receive-loop writer, socket-owner reader
    recv_tx: mpsc::Sender<Envelope>,
    recv_rx: Mutex<mpsc::Receiver<Envelope>>,
    /// Set exactly once on close
    closed: Flag,
    /// Open until the first inbound message arrives
    gate: Flag,
    /// Last link-level send failure, surfaced on the next send
    fault: RwLock<Option<String>>,
}

impl Socket {
    pub fn new(
        addr: &str,
        local: String,
        remote: String,
        send_tx: mpsc::Sender<Envelope>,
        recv_depth: usize,
    ) -> Arc<Self> {
        let (recv_tx, recv_rx) = mpsc::channel(recv_depth);
        Arc::new(Self {
            key: routing_key(addr),
            session: Uuid::new_v4().to_string(),
            local,
            remote: RwLock::new(remote),
            send_tx,
            recv_tx,
            recv_rx: Mutex::new(recv_rx),
            closed: Flag::new(),
            gate: Flag::new(),
            fault: RwLock::new(None),
        })
    }

    /// Accept-side socket for one arriving session: same routing key as
    /// the bound socket, the peer's session identifier, gate already
    /// closed since a message has by definition arrived.
    pub fn accepted(
        bound: &Socket,
        session: String,
        remote: String,
        recv_depth: usize,
    ) -> Arc<Self> {
        let (recv_tx, recv_rx) = mpsc::channel(recv_depth);
        let socket = Self {
            key: bound.key.clone(),
            session,
            local: bound.local.clone(),
            remote: RwLock::new(remote),
            send_tx: bound.send_tx.clone(),
            recv_tx,
            recv_rx: Mutex::new(recv_rx),
            closed: Flag::new(),
            gate: Flag::new(),
            fault: RwLock::new(None),
        };
        socket.gate.set();
        Arc::new(socket)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn remote(&self) -> String {
        self.remote.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn closed(&self) -> &Flag {
        &self.closed
    }

    pub fn gate(&self) -> &Flag {
        &self.gate
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }

    /// First inbound message for this socket: learn the peer address and
    /// release anyone blocked on the gate. Fires at most once.
    pub fn connected(&self, remote: Option<&str>) {
        if self.gate.is_set() {
            return;
        }
        if let Some(addr) = remote {
            if let Ok(mut r) = self.remote.write() {
                *r = addr.to_string();
            }
        }
        self.gate.set();
    }

    /// Record a link-level send failure; the socket's next send surfaces
    /// it. Only the first failure is kept.
    pub fn set_fault(&self, err: String) {
        if let Ok(mut fault) = self.fault.write() {
            fault.get_or_insert(err);
        }
    }

    /// Non-blocking delivery from the receive loop. A full queue drops the
    /// message rather than stalling the shared demultiplexer.
    pub fn deliver(&self, env: Envelope) -> bool {
        self.recv_tx.try_send(env).is_ok()
    }

    /// Queue one message onto the shared outbound queue.
    pub async fn send(&self, msg: Message) -> Result<(), TunnelError> {
        if self.closed.is_set() {
            return Err(TunnelError::Closed);
        }
        if let Some(err) = self.fault.read().ok().and_then(|f| f.clone()) {
            return Err(TunnelError::Faulted(err));
        }
        let env = Envelope {
            key: self.key.clone(),
            session: self.session.clone(),
            message: msg,
        };
        self.send_tx
            .send(env)
            .await
            .map_err(|_| TunnelError::Closed)
    }

    /// Next inbound envelope, or an error once the socket is closed.
    pub async fn next(&self) -> Result<Envelope, TunnelError> {
        let mut rx = self.recv_rx.lock().await;
        tokio::select! {
            env = rx.recv() => env.ok_or(TunnelError::Closed),
            _ = self.closed.wait() => Err(TunnelError::Closed),
        }
    }

    /// Close the socket. Idempotent.
    pub fn close(&self) {
        self.closed.set();
    }
}

/// Connection-shaped handle over a socket. Cheap to clone; every clone
/// refers to the same underlying socket.
#[derive(Clone)]
pub struct Conn {
    socket: Arc<Socket>,
}

impl Conn {
    pub(crate) fn new(socket: Arc<Socket>) -> Self {
        Self { socket }
    }

    /// Routing key identifying this connection on the wire.
    pub fn key(&self) -> &str {
        self.socket.key()
    }

    /// Session identifier of this connection instance.
    pub fn session(&self) -> &str {
        self.socket.session()
    }

    /// Local address.
    pub fn local(&self) -> &str {
        self.socket.local()
    }

    /// Remote address. On the accept side this is learned from the first
    /// inbound message.
    pub fn remote(&self) -> String {
        self.socket.remote()
    }

    /// Queue one message for transmission over the link.
    pub async fn send(&self, msg: Message) -> Result<(), TunnelError> {
        self.socket.send(msg).await
    }

    /// Receive the next message for this connection.
    pub async fn recv(&self) -> Result<Message, TunnelError> {
        self.socket.next().await.map(|env| env.message)
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.socket.close();
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // hex SHA-256 of "peer-1:9000"
    const PEER1_KEY: &str = "18cc9c0d103b77b93a63f4d9ebdf07557f3f962c343cfed21eb8385fa11d4bd6";

    fn test_socket(addr: &str, depth: usize) -> (Arc<Socket>, mpsc::Receiver<Envelope>) {
        let (send_tx, send_rx) = mpsc::channel(16);
        let socket = Socket::new(addr, "local:1".to_string(), "remote:1".to_string(), send_tx, depth);
        (socket, send_rx)
    }

    #[test]
    fn test_flag_sets_once() {
        let flag = Flag::new();
        assert!(!flag.is_set());
        assert!(flag.set());
        assert!(flag.is_set());
        assert!(!flag.set());
    }

    #[tokio::test]
    async fn test_flag_wait_after_set() {
        let flag = Flag::new();
        flag.set();
        // must not hang
        flag.wait().await;
    }

    #[test]
    fn test_routing_key_deterministic() {
        assert_eq!(routing_key("peer-1:9000"), PEER1_KEY);
        assert_eq!(routing_key("peer-1:9000"), routing_key("peer-1:9000"));
        assert_ne!(routing_key("peer-1:9000"), routing_key("peer-2:9000"));
    }

    #[test]
    fn test_routing_key_empty_addr_is_random() {
        let a = routing_key("");
        let b = routing_key("");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sessions_are_unique() {
        let (a, _rx_a) = test_socket("peer-1:9000", 4);
        let (b, _rx_b) = test_socket("peer-1:9000", 4);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.session(), b.session());
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (socket, _send_rx) = test_socket("peer-1:9000", 4);
        socket.close();
        let result = socket.send(Message::new(Bytes::new())).await;
        assert!(matches!(result, Err(TunnelError::Closed)));
    }

    #[tokio::test]
    async fn test_send_after_fault() {
        let (socket, _send_rx) = test_socket("peer-1:9000", 4);
        socket.set_fault("wire down".to_string());
        let result = socket.send(Message::new(Bytes::new())).await;
        assert!(matches!(result, Err(TunnelError::Faulted(_))));
    }

    #[tokio::test]
    async fn test_deliver_drops_on_full_keeps_order() {
        let (socket, _send_rx) = test_socket("peer-1:9000", 2);

        for i in 0..3u8 {
            let env = Envelope {
                key: socket.key().to_string(),
                session: "s".to_string(),
                message: Message::new(Bytes::from(vec![i])),
            };
            let delivered = socket.deliver(env);
            assert_eq!(delivered, i < 2);
        }

        // the two oldest survive, in order
        assert_eq!(&socket.next().await.unwrap().message.body[..], &[0]);
        assert_eq!(&socket.next().await.unwrap().message.body[..], &[1]);
    }

    #[tokio::test]
    async fn test_connected_learns_remote_once() {
        let (socket, _send_rx) = test_socket("svc-a:7000", 4);
        assert!(!socket.gate().is_set());

        socket.connected(Some("peer-9:4000"));
        assert!(socket.gate().is_set());
        assert_eq!(socket.remote(), "peer-9:4000");

        // later messages must not overwrite the learned address
        socket.connected(Some("peer-0:1"));
        assert_eq!(socket.remote(), "peer-9:4000");
    }

    #[tokio::test]
    async fn test_accepted_socket_pre_gated() {
        let (bound, _send_rx) = test_socket("svc-a:7000", 4);
        let conn = Socket::accepted(&bound, "sess-1".to_string(), "peer-9:4000".to_string(), 4);

        assert!(conn.gate().is_set());
        assert_eq!(conn.key(), bound.key());
        assert_eq!(conn.session(), "sess-1");
        assert_eq!(conn.remote(), "peer-9:4000");
    }
}
