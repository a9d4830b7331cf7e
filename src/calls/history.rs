//! Call history queries on behalf of one profile.

use crate::store::{CallRecordStore, ProfileDirectory, StoreError};
use log::{debug, warn};
use sigcore::types::{
    CallHistoryItem, CallHistoryPage, CallId, CallRecord, CallStats, CallerProfile,
    DEFAULT_HISTORY_LIMIT, HistoryCursor, MAX_HISTORY_LIMIT, ProfileId,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid history cursor: {0}")]
    InvalidCursor(String),
}

/// Read side of the call record store, with participant profiles resolved.
#[derive(Clone)]
pub struct CallHistory {
    records: Arc<dyn CallRecordStore>,
    profiles: Arc<dyn ProfileDirectory>,
}

impl CallHistory {
    pub fn new(records: Arc<dyn CallRecordStore>, profiles: Arc<dyn ProfileDirectory>) -> Self {
        Self { records, profiles }
    }

    /// One page of `viewer`'s calls, newest first. `limit` defaults to 50 and
    /// is clamped to 1..=100.
    pub async fn list(
        &self,
        viewer: &ProfileId,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<CallHistoryPage, HistoryError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let before = cursor
            .map(|c| HistoryCursor::decode(c).ok_or_else(|| HistoryError::InvalidCursor(c.to_string())))
            .transpose()?;

        let mut records = self
            .records
            .list_calls(viewer, before.as_ref(), limit + 1)
            .await?;
        let next_cursor = if records.len() > limit {
            records.truncate(limit);
            records.last().map(|r| HistoryCursor::after(r).encode())
        } else {
            None
        };

        let mut profiles = HashMap::new();
        let mut calls = Vec::with_capacity(records.len());
        for record in records {
            let caller = self.profile(&mut profiles, &record.caller_id).await;
            let callee = self.profile(&mut profiles, &record.callee_id).await;
            calls.push(history_item(record, caller, callee, viewer));
        }
        debug!(target: "Calls/History", "Listed {} calls for {viewer}", calls.len());
        Ok(CallHistoryPage { calls, next_cursor })
    }

    pub async fn stats(&self, viewer: &ProfileId) -> Result<CallStats, HistoryError> {
        Ok(self.records.call_stats(viewer).await?)
    }

    /// Remove one call from `viewer`'s history. Returns whether it was there.
    pub async fn delete(&self, viewer: &ProfileId, call_id: &CallId) -> Result<bool, HistoryError> {
        let removed = self.records.delete_call(viewer, call_id).await?;
        debug!(target: "Calls/History", "{viewer} deleted call {call_id}: {removed}");
        Ok(removed)
    }

    pub async fn clear(&self, viewer: &ProfileId) -> Result<u64, HistoryError> {
        let removed = self.records.delete_all_calls(viewer).await?;
        debug!(target: "Calls/History", "{viewer} cleared {removed} calls");
        Ok(removed)
    }

    async fn profile(
        &self,
        cache: &mut HashMap<ProfileId, CallerProfile>,
        id: &ProfileId,
    ) -> CallerProfile {
        if let Some(profile) = cache.get(id) {
            return profile.clone();
        }
        let profile = match self.profiles.caller_profile(id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => CallerProfile::bare(id.clone()),
            Err(e) => {
                warn!(target: "Calls/History", "Profile lookup for {id} failed: {e}");
                CallerProfile::bare(id.clone())
            }
        };
        cache.insert(id.clone(), profile.clone());
        profile
    }
}

fn history_item(
    record: CallRecord,
    caller: CallerProfile,
    callee: CallerProfile,
    viewer: &ProfileId,
) -> CallHistoryItem {
    CallHistoryItem {
        is_outgoing: &record.caller_id == viewer,
        id: record.id,
        thread_id: record.thread_id,
        kind: record.kind,
        status: record.status,
        caller,
        callee,
        started_at: record.started_at,
        ended_at: record.ended_at,
        duration: record.duration,
        created_at: record.created_at,
    }
}
