//! Out-of-band alerts for callees without a live connection.

use async_trait::async_trait;
use log::info;
use sigcore::types::{CallId, CallKind, ProfileId};

/// Content of an incoming-call push alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallAlert {
    pub recipient: ProfileId,
    pub caller_name: String,
    pub caller_avatar: Option<String>,
    pub kind: CallKind,
    pub thread_id: String,
    pub call_id: CallId,
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Send the alert. Returns whether any device was targeted.
    async fn notify_incoming_call(&self, alert: &IncomingCallAlert) -> anyhow::Result<bool>;
}

/// Notifier that only logs; used when no push provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPushNotifier;

#[async_trait]
impl PushNotifier for LoggingPushNotifier {
    async fn notify_incoming_call(&self, alert: &IncomingCallAlert) -> anyhow::Result<bool> {
        info!(
            target: "Calls/Push",
            "Incoming {} call from {} for {} (call {}, thread {})",
            alert.kind, alert.caller_name, alert.recipient, alert.call_id, alert.thread_id
        );
        Ok(false)
    }
}
