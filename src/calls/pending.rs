//! Offers parked for callees without a live connection, and their recovery
//! when the callee reconnects.

use super::coordinator::Coordinator;
use super::error::CoordinatorError;
use super::push::IncomingCallAlert;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sigcore::protocol::{IncomingCallData, ServerMessage};
use sigcore::types::{CallId, CallStatus, EndReason, PendingCall, ProfileId};
use std::sync::Arc;

impl Coordinator {
    /// Park an undeliverable offer and alert the callee out of band.
    pub(super) async fn park_offer(
        &self,
        callee: &ProfileId,
        incoming: IncomingCallData,
        created_at: DateTime<Utc>,
    ) {
        let alert = IncomingCallAlert {
            recipient: callee.clone(),
            caller_name: incoming
                .caller
                .notification_name()
                .unwrap_or(self.config.fallback_caller_name.as_str())
                .to_string(),
            caller_avatar: incoming.caller.avatar_url.clone(),
            kind: incoming.kind,
            thread_id: incoming.thread_id.clone(),
            call_id: incoming.call_id.clone(),
        };
        let pending = PendingCall {
            call_id: incoming.call_id,
            thread_id: incoming.thread_id,
            caller: incoming.caller,
            kind: incoming.kind,
            sdp: incoming.sdp,
            created_at,
        };

        match self.pending.put_pending(callee, &pending).await {
            Ok(()) => {
                debug!(target: "Calls/Coordinator", "Parked offer {} for {callee}", pending.call_id);
                // The callee may have connected after delivery failed but
                // before the offer was parked.
                if self.hub.is_connected(callee) {
                    if let Err(e) = self.recover_pending(callee).await {
                        warn!(target: "Calls/Coordinator", "Late delivery to {callee} failed: {e}");
                    }
                }
            }
            Err(e) => {
                warn!(target: "Calls/Coordinator", "Failed to park offer {} for {callee}: {e}", pending.call_id);
            }
        }

        if self.config.push_fallback {
            let push = Arc::clone(&self.push);
            tokio::spawn(async move {
                match push.notify_incoming_call(&alert).await {
                    Ok(true) => {
                        debug!(target: "Calls/Push", "Alerted {} for call {}", alert.recipient, alert.call_id)
                    }
                    Ok(false) => {
                        debug!(target: "Calls/Push", "No devices to alert for {}", alert.recipient)
                    }
                    Err(e) => {
                        warn!(target: "Calls/Push", "Push for call {} failed: {e:#}", alert.call_id)
                    }
                }
            });
        }
    }

    /// Delete the pending offer for `recipient` if it belongs to `call_id`.
    pub(super) async fn clear_pending(&self, recipient: &ProfileId, call_id: &CallId) {
        match self.pending.get_pending(recipient).await {
            Ok(Some(pending)) if &pending.call_id == call_id => {
                if let Err(e) = self.pending.delete_pending(recipient).await {
                    warn!(target: "Calls/Coordinator", "Failed to drop pending offer {call_id}: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(target: "Calls/Coordinator", "Failed to read pending offer for {recipient}: {e}"),
        }
    }

    /// Replay a parked offer to a recipient that just connected.
    ///
    /// The offer is consumed either way. It is delivered only if its call is
    /// still ringing, the recipient is its callee, and the caller is still
    /// connected; a call whose caller has gone is ended as missed on the
    /// spot. A call missing from the live registry (e.g. after a restart) is
    /// re-admitted with a ring timer covering what is left of the ring
    /// window. Returns whether an offer was delivered.
    pub async fn recover_pending(&self, recipient: &ProfileId) -> Result<bool, CoordinatorError> {
        let Some(pending) = self.pending.take_pending(recipient).await? else {
            return Ok(false);
        };
        let call_id = pending.call_id.clone();

        let Some(record) = self.records.get_call(&call_id).await? else {
            debug!(target: "Calls/Coordinator", "Dropping pending offer {call_id}: no record");
            return Ok(false);
        };
        if record.status != CallStatus::Ringing || &record.callee_id != recipient {
            debug!(target: "Calls/Coordinator", "Dropping stale pending offer {call_id} ({:?})", record.status);
            return Ok(false);
        }
        if !self.hub.is_connected(&record.caller_id) {
            // The caller left while the offer was parked.
            match self.registry.remove(&call_id) {
                Some(call) => {
                    self.record_end(&call_id, &call, EndReason::Missed).await;
                }
                None => {
                    self.records
                        .finalize(&call_id, EndReason::Missed, Utc::now(), None)
                        .await?;
                }
            }
            info!(target: "Calls/Coordinator", "Dropped pending offer {call_id}: caller {} offline", record.caller_id);
            return Ok(false);
        }

        if !self.registry.contains(&call_id) {
            let elapsed = (Utc::now() - record.created_at)
                .to_std()
                .unwrap_or_default();
            let remaining = self.config.ring_timeout.saturating_sub(elapsed);
            if remaining.is_zero() {
                self.records
                    .finalize(&call_id, EndReason::Missed, Utc::now(), None)
                    .await?;
                info!(target: "Calls/Coordinator", "Pending offer {call_id} outlived its ring window");
                return Ok(false);
            }
            if let Err(e) = self.registry.claim(&call_id, &record.caller_id, recipient) {
                self.records
                    .finalize(&call_id, EndReason::Missed, Utc::now(), None)
                    .await?;
                info!(target: "Calls/Coordinator", "Pending offer {call_id} dropped: {e}");
                return Ok(false);
            }
            self.arm_ring_timer(&call_id, remaining);
        }

        if !self
            .hub
            .send_to_profile(recipient, ServerMessage::Incoming(pending.into()))
        {
            warn!(target: "Calls/Coordinator", "Recovered offer {call_id} could not be delivered to {recipient}");
            return Ok(false);
        }
        info!(target: "Calls/Coordinator", "Delivered pending offer {call_id} to {recipient}");
        Ok(true)
    }
}
