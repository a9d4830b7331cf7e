use crate::store::error::Result;
use crate::types::{
    CallId, CallRecord, CallStats, CallerProfile, EndReason, HistoryCursor, PendingCall, ProfileId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable, append-only history of call attempts.
///
/// Status transitions are monotone: implementations must ignore a
/// `mark_answered` for a call that is no longer ringing and a `finalize`
/// for a call that already reached a terminal status, returning `false`.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn create_call(&self, record: &CallRecord) -> Result<()>;

    async fn get_call(&self, call_id: &CallId) -> Result<Option<CallRecord>>;

    /// Move a ringing call to ongoing. Returns whether the record changed.
    async fn mark_answered(&self, call_id: &CallId, started_at: DateTime<Utc>) -> Result<bool>;

    /// Write the terminal status, end time and duration. Returns whether the record changed.
    async fn finalize(
        &self,
        call_id: &CallId,
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration: Option<u64>,
    ) -> Result<bool>;

    /// Records involving `viewer` that it has not deleted, newest first,
    /// starting strictly after `before`.
    async fn list_calls(
        &self,
        viewer: &ProfileId,
        before: Option<&HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<CallRecord>>;

    async fn call_stats(&self, viewer: &ProfileId) -> Result<CallStats>;

    /// Remove one call from `viewer`'s history only; the other participant
    /// keeps it. Returns whether a visible call was removed.
    async fn delete_call(&self, viewer: &ProfileId, call_id: &CallId) -> Result<bool>;

    /// Remove every call from `viewer`'s history, returning how many.
    async fn delete_all_calls(&self, viewer: &ProfileId) -> Result<u64>;
}

/// Short-lived mailbox of offers addressed to unreachable recipients.
///
/// Keyed by recipient; entries expire on their own after the store's TTL.
#[async_trait]
pub trait PendingCallStore: Send + Sync {
    async fn put_pending(&self, recipient: &ProfileId, pending: &PendingCall) -> Result<()>;

    async fn get_pending(&self, recipient: &ProfileId) -> Result<Option<PendingCall>>;

    async fn delete_pending(&self, recipient: &ProfileId) -> Result<()>;

    /// Read and delete in one step.
    async fn take_pending(&self, recipient: &ProfileId) -> Result<Option<PendingCall>> {
        let pending = self.get_pending(recipient).await?;
        if pending.is_some() {
            self.delete_pending(recipient).await?;
        }
        Ok(pending)
    }
}

/// Lookup of public profile data shown to a callee.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn caller_profile(&self, profile: &ProfileId) -> Result<Option<CallerProfile>>;
}
