use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle to one live socket. Frames pushed here are written out by the
/// connection's writer task.
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { id: Uuid::now_v7(), tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queues an already-serialized frame. Returns false if the socket is gone.
    pub fn send_text(&self, text: Utf8Bytes) -> bool {
        self.tx.send(Message::Text(text)).is_ok()
    }

    /// Asks the writer to send a close frame and stop.
    pub fn close(&self, code: u16, reason: &'static str) -> bool {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.tx.send(Message::Close(Some(frame))).is_ok()
    }

    /// Serializes and queues `event` for this socket only.
    pub fn send<T: Serialize>(&self, event: &T) -> bool {
        match serde_json::to_string(event) {
            Ok(text) => self.send_text(text.into()),
            Err(e) => {
                tracing::error!(conn_id = %self.id, "failed to serialize event: {e}");
                false
            }
        }
    }
}

/// Live connections per user. One user may hold several (one per tab).
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    users: Arc<DashMap<String, HashMap<Uuid, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(&self, user_id: &str, conn: Connection) {
        self.users
            .entry(user_id.to_owned())
            .or_default()
            .insert(conn.id, conn);
    }

    /// Drops `conn`; the user's key goes with it once no connection is left.
    pub fn remove_connection(&self, user_id: &str, conn: &Connection) {
        if let Some(mut conns) = self.users.get_mut(user_id) {
            conns.remove(&conn.id);
        }
        self.users.remove_if(user_id, |_, conns| conns.is_empty());
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|conns| !conns.is_empty())
    }

    /// Sends `message` to every open connection of `user_id` and returns how
    /// many accepted it. Closed sockets are skipped, not evicted; eviction
    /// belongs to the disconnect path.
    pub fn broadcast<T: Serialize>(&self, user_id: &str, message: &T) -> usize {
        let Some(conns) = self.users.get(user_id) else {
            return 0;
        };

        let text: Utf8Bytes = match serde_json::to_string(message) {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::error!(user_id, "failed to serialize broadcast: {e}");
                return 0;
            }
        };

        conns
            .values()
            .filter(|conn| conn.is_open())
            .filter(|conn| conn.send_text(text.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn add_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = Connection::channel();

        registry.add_connection("u", conn.clone());
        registry.add_connection("u", conn.clone());

        assert_eq!(registry.broadcast("u", &json!({"n": 1})), 1);
        let Message::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected a text frame");
        };
        assert_eq!(text.as_str(), r#"{"n":1}"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn last_removal_takes_user_offline() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = Connection::channel();
        let (b, _rx_b) = Connection::channel();

        registry.add_connection("u", a.clone());
        registry.add_connection("u", b.clone());
        registry.remove_connection("u", &a);
        assert!(registry.is_online("u"));

        registry.remove_connection("u", &b);
        assert!(!registry.is_online("u"));
        assert!(registry.users.get("u").is_none());

        assert_eq!(registry.broadcast("u", &json!({})), 0);
        registry.remove_connection("u", &b);
    }

    #[test]
    fn broadcast_skips_closed_connections() {
        let registry = ConnectionRegistry::new();
        let (open, mut rx_open) = Connection::channel();
        let (closed, rx_closed) = Connection::channel();
        drop(rx_closed);

        registry.add_connection("u", open);
        registry.add_connection("u", closed.clone());

        assert_eq!(registry.broadcast("u", &json!({"hi": true})), 1);
        assert!(rx_open.try_recv().is_ok());
        // still registered until the disconnect path removes it
        assert_eq!(registry.users.get("u").unwrap().len(), 2);
    }

    #[test]
    fn broadcast_reaches_only_the_named_user() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = Connection::channel();
        let (b, mut rx_b) = Connection::channel();
        registry.add_connection("a", a);
        registry.add_connection("b", b);

        registry.broadcast("a", &json!("ping"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
