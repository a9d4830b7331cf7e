use sigcore::protocol::ClientMessage;
use tokio::sync::mpsc;

/// Outbound half of the client's signaling connection.
pub trait SignalingSender: Send + Sync {
    /// Queue `message` for the server. Returns `false` once the connection is gone.
    fn send(&self, message: ClientMessage) -> bool;
}

impl SignalingSender for mpsc::UnboundedSender<ClientMessage> {
    fn send(&self, message: ClientMessage) -> bool {
        mpsc::UnboundedSender::send(self, message).is_ok()
    }
}
