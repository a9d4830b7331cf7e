//! Per-profile call history views.

use super::call::{CallId, CallKind, CallRecord, CallStatus, CallerProfile, ProfileId};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Page size used when a history request does not give one.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Position after the last record of a history page.
///
/// Pages are ordered newest first by `(created_at, call_id)`; a cursor
/// selects the records strictly older than that pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub call_id: CallId,
}

impl HistoryCursor {
    pub fn after(record: &CallRecord) -> Self {
        Self {
            created_at: record.created_at,
            call_id: record.id.clone(),
        }
    }

    /// Whether `record` sorts after this cursor, i.e. belongs to a later page.
    pub fn precedes(&self, record: &CallRecord) -> bool {
        (record.created_at, &record.id) < (self.created_at, &self.call_id)
    }

    /// Opaque wire form: `<unix millis>.<call id>`.
    pub fn encode(&self) -> String {
        format!("{}.{}", self.created_at.timestamp_millis(), self.call_id)
    }

    pub fn decode(cursor: &str) -> Option<Self> {
        let (millis, call_id) = cursor.split_once('.')?;
        let millis: i64 = millis.parse().ok()?;
        if call_id.is_empty() {
            return None;
        }
        Some(Self {
            created_at: Utc.timestamp_millis_opt(millis).single()?,
            call_id: CallId::new(call_id),
        })
    }
}

/// Aggregate counters over the calls a profile can still see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStats {
    pub total_calls: u64,
    /// Calls to this profile that rang out unanswered.
    pub missed_calls: u64,
    pub total_duration_seconds: u64,
}

impl CallStats {
    /// Fold one record into the counters, seen from `viewer`.
    pub fn add(&mut self, record: &CallRecord, viewer: &ProfileId) {
        self.total_calls += 1;
        if record.status == CallStatus::Missed && &record.callee_id == viewer {
            self.missed_calls += 1;
        }
        self.total_duration_seconds += record.duration.unwrap_or(0);
    }
}

/// One history row with both participants resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryItem {
    pub id: CallId,
    pub thread_id: String,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub status: CallStatus,
    pub caller: CallerProfile,
    pub callee: CallerProfile,
    pub is_outgoing: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryPage {
    pub calls: Vec<CallHistoryItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
