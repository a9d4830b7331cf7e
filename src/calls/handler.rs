//! Dispatch of decoded client envelopes.

use super::coordinator::Coordinator;
use log::{debug, warn};
use sigcore::protocol::ClientMessage;
use sigcore::types::ProfileId;

impl Coordinator {
    /// Apply one envelope received from `from`.
    ///
    /// Failures caused by stale or misdirected messages are expected under
    /// normal races and only logged at debug level.
    pub async fn handle_message(&self, from: &ProfileId, message: ClientMessage) {
        let op = message.op();
        debug!(target: "Calls/Coordinator", "Received {op} from {from}");

        let result = match message {
            ClientMessage::Offer(offer) => self.offer(from, offer).await.map(|_| ()),
            ClientMessage::Answer(answer) => self.answer(from, answer).await,
            ClientMessage::Reject(call) => self.reject(from, &call.call_id).await.map(|_| ()),
            ClientMessage::End(call) => self.end(from, &call.call_id).await.map(|_| ()),
            ClientMessage::IceCandidate(candidate) => self.ice_candidate(from, candidate).await,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_benign() => {
                debug!(target: "Calls/Coordinator", "Ignored {op} from {from}: {e}")
            }
            Err(e) => warn!(target: "Calls/Coordinator", "Failed to handle {op} from {from}: {e}"),
        }
    }
}
