use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::models::{ConnectionMeta, Identity};
use crate::ws::ServerMessage;

/// Per-connection state, owned by the connection's task.
///
/// There is deliberately no global connection-to-identity map: the
/// context travels through every handler invocation and dies with the
/// connection.
#[derive(Debug)]
pub struct ConnectionContext {
    pub conn_id: String,
    pub meta: ConnectionMeta,
    identity: Option<Identity>,
    pub authenticated_at: Option<DateTime<Utc>>,
    /// Rooms this connection has joined, for disconnect cleanup.
    pub joined_rooms: HashSet<String>,
}

impl ConnectionContext {
    pub fn new(conn_id: String, meta: ConnectionMeta) -> Self {
        Self {
            conn_id,
            meta,
            identity: None,
            authenticated_at: None,
            joined_rooms: HashSet::new(),
        }
    }

    pub fn attach_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.authenticated_at = Some(Utc::now());
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

/// Handle for pushing messages to one connected client.
///
/// The sender feeds the connection's writer task; sends never block.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub conn_id: String,
    pub identity_id: String,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientHandle {
    pub fn new(
        conn_id: String,
        identity_id: String,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            conn_id,
            identity_id,
            sender,
        }
    }

    /// Queue a message for delivery. A send to a closing connection
    /// is quietly dropped; its departure is handled by the disconnect
    /// path.
    pub fn send(&self, msg: ServerMessage) {
        let _ = self.sender.send(msg);
    }
}
