//! Internal message envelope and the tunnel's wire-header contract
//!
//! The tunnel stamps two headers on every outgoing message and reads the
//! same two from every incoming one; the payload itself stays opaque.

use crate::link::Message;

/// Header carrying the routing key (hex SHA-256 digest of the address).
pub const HEADER_ID: &str = "Tunnel-Id";

/// Header carrying the sending socket's session identifier.
pub const HEADER_SESSION: &str = "Tunnel-Session";

/// Unit moved through the shared outbound queue and the per-socket
/// inbound queues.
#[derive(Debug)]
pub(crate) struct Envelope {
    /// Routing key of the owning socket
    pub key: String,
    /// Session identifier of the sending socket instance
    pub session: String,
    /// The wire payload, opaque to the multiplexer
    pub message: Message,
}

impl Envelope {
    /// Build the outgoing wire message with both routing headers stamped.
    pub fn stamp(&self) -> Message {
        let mut msg = self.message.clone();
        msg.headers.insert(HEADER_ID.to_string(), self.key.clone());
        msg.headers
            .insert(HEADER_SESSION.to_string(), self.session.clone());
        msg
    }

    /// Read the routing headers from an incoming wire message.
    ///
    /// Missing headers come back as empty strings; an empty key simply
    /// never matches a table entry.
    pub fn unpack(msg: &Message) -> (String, String) {
        let key = msg.headers.get(HEADER_ID).cloned().unwrap_or_default();
        let session = msg
            .headers
            .get(HEADER_SESSION)
            .cloned()
            .unwrap_or_default();
        (key, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_stamp_sets_routing_headers() {
        let env = Envelope {
            key: "abc123".to_string(),
            session: "sess-1".to_string(),
            message: Message::new(Bytes::from_static(b"payload")),
        };

        let msg = env.stamp();
        assert_eq!(msg.headers.get(HEADER_ID).unwrap(), "abc123");
        assert_eq!(msg.headers.get(HEADER_SESSION).unwrap(), "sess-1");
        assert_eq!(&msg.body[..], b"payload");
    }

    #[test]
    fn test_unpack_roundtrip() {
        let env = Envelope {
            key: "abc123".to_string(),
            session: "sess-1".to_string(),
            message: Message::new(Bytes::new()),
        };

        let (key, session) = Envelope::unpack(&env.stamp());
        assert_eq!(key, "abc123");
        assert_eq!(session, "sess-1");
    }

    #[test]
    fn test_unpack_missing_headers() {
        let (key, session) = Envelope::unpack(&Message::new(Bytes::new()));
        assert!(key.is_empty());
        assert!(session.is_empty());
    }
}
