use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sigcore::store::error::Result;
use sigcore::store::{CallRecordStore, PendingCallStore, ProfileDirectory};
use sigcore::types::{
    CallId, CallRecord, CallStats, CallStatus, CallerProfile, EndReason, HistoryCursor,
    PendingCall, ProfileId,
};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Call history kept in process memory.
#[derive(Default)]
pub struct MemoryCallRecordStore {
    records: DashMap<CallId, CallRecord>,
    /// Calls each profile removed from its own history.
    hidden: DashMap<ProfileId, HashSet<CallId>>,
}

impl MemoryCallRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records `viewer` took part in and has not deleted, newest first.
    fn visible_to(&self, viewer: &ProfileId) -> Vec<CallRecord> {
        let hidden = self
            .hidden
            .get(viewer)
            .map(|h| h.value().clone())
            .unwrap_or_default();
        let mut records: Vec<CallRecord> = self
            .records
            .iter()
            .filter(|r| r.involves(viewer) && !hidden.contains(r.key()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        records
    }
}

#[async_trait]
impl CallRecordStore for MemoryCallRecordStore {
    async fn create_call(&self, record: &CallRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_call(&self, call_id: &CallId) -> Result<Option<CallRecord>> {
        Ok(self.records.get(call_id).map(|r| r.value().clone()))
    }

    async fn mark_answered(&self, call_id: &CallId, started_at: DateTime<Utc>) -> Result<bool> {
        let Some(mut record) = self.records.get_mut(call_id) else {
            return Ok(false);
        };
        if record.status != CallStatus::Ringing {
            return Ok(false);
        }
        record.status = CallStatus::Ongoing;
        record.started_at = Some(started_at);
        Ok(true)
    }

    async fn finalize(
        &self,
        call_id: &CallId,
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration: Option<u64>,
    ) -> Result<bool> {
        let Some(mut record) = self.records.get_mut(call_id) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = reason.status();
        record.end_reason = Some(reason);
        record.ended_at = Some(ended_at);
        record.duration = duration;
        Ok(true)
    }

    async fn list_calls(
        &self,
        viewer: &ProfileId,
        before: Option<&HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<CallRecord>> {
        Ok(self
            .visible_to(viewer)
            .into_iter()
            .filter(|r| before.is_none_or(|cursor| cursor.precedes(r)))
            .take(limit)
            .collect())
    }

    async fn call_stats(&self, viewer: &ProfileId) -> Result<CallStats> {
        let mut stats = CallStats::default();
        for record in self.visible_to(viewer) {
            stats.add(&record, viewer);
        }
        Ok(stats)
    }

    async fn delete_call(&self, viewer: &ProfileId, call_id: &CallId) -> Result<bool> {
        let involved = self
            .records
            .get(call_id)
            .is_some_and(|r| r.involves(viewer));
        if !involved {
            return Ok(false);
        }
        Ok(self
            .hidden
            .entry(viewer.clone())
            .or_default()
            .insert(call_id.clone()))
    }

    async fn delete_all_calls(&self, viewer: &ProfileId) -> Result<u64> {
        let visible: Vec<CallId> = self
            .visible_to(viewer)
            .into_iter()
            .map(|r| r.id)
            .collect();
        let mut hidden = self.hidden.entry(viewer.clone()).or_default();
        hidden.extend(visible.iter().cloned());
        Ok(visible.len() as u64)
    }
}

/// Pending offers keyed by recipient, each expiring after a fixed TTL.
pub struct MemoryPendingCallStore {
    entries: DashMap<ProfileId, (PendingCall, Instant)>,
    ttl: Duration,
}

impl MemoryPendingCallStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl PendingCallStore for MemoryPendingCallStore {
    async fn put_pending(&self, recipient: &ProfileId, pending: &PendingCall) -> Result<()> {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .insert(recipient.clone(), (pending.clone(), expires_at));
        Ok(())
    }

    async fn get_pending(&self, recipient: &ProfileId) -> Result<Option<PendingCall>> {
        let now = Instant::now();
        let live = self
            .entries
            .get(recipient)
            .map(|entry| (entry.1 > now).then(|| entry.0.clone()));
        match live {
            Some(Some(pending)) => Ok(Some(pending)),
            Some(None) => {
                self.entries.remove_if(recipient, |_, (_, at)| *at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_pending(&self, recipient: &ProfileId) -> Result<()> {
        self.entries.remove(recipient);
        Ok(())
    }

    async fn take_pending(&self, recipient: &ProfileId) -> Result<Option<PendingCall>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(recipient)
            .filter(|(_, (_, expires_at))| *expires_at > now)
            .map(|(_, (pending, _))| pending))
    }
}

/// Public caller profiles kept in process memory.
#[derive(Default)]
pub struct MemoryProfileDirectory {
    profiles: DashMap<ProfileId, CallerProfile>,
}

impl MemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: CallerProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfileDirectory {
    async fn caller_profile(&self, profile: &ProfileId) -> Result<Option<CallerProfile>> {
        Ok(self.profiles.get(profile).map(|p| p.value().clone()))
    }
}
