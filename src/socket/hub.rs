//! Registry of live connections, one per profile.

use super::consts::OUTBOUND_QUEUE_CAPACITY;
use dashmap::DashMap;
use log::{debug, warn};
use sigcore::protocol::ServerMessage;
use sigcore::types::ProfileId;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type ConnectionId = u64;

struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
}

/// Routes server messages to whichever connection a profile currently holds.
///
/// A newer connection for the same profile replaces the older one; the older
/// connection's receiver then drains and closes.
#[derive(Default)]
pub struct ConnectionHub {
    connections: DashMap<ProfileId, Connection>,
    next_id: AtomicU64,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `profile`, replacing any previous one.
    pub fn register(&self, profile: &ProfileId) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        if let Some(previous) = self
            .connections
            .insert(profile.clone(), Connection { id, outbound })
        {
            debug!(
                target: "Socket/Hub",
                "Connection {} for {profile} replaced by {id}", previous.id
            );
        }
        (id, rx)
    }

    /// Remove the connection only if it is still the current one for `profile`.
    pub fn unregister(&self, profile: &ProfileId, id: ConnectionId) -> bool {
        self.connections
            .remove_if(profile, |_, conn| conn.id == id)
            .is_some()
    }

    pub fn is_connected(&self, profile: &ProfileId) -> bool {
        self.connections
            .get(profile)
            .is_some_and(|conn| !conn.outbound.is_closed())
    }

    /// Queue `message` for `profile`. Returns `false` if the profile has no
    /// live connection or its queue is full.
    pub fn send_to_profile(&self, profile: &ProfileId, message: ServerMessage) -> bool {
        let Some(conn) = self.connections.get(profile) else {
            return false;
        };
        match conn.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    target: "Socket/Hub",
                    "Outbound queue full for {profile}, dropping {}", message.op()
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }
}
