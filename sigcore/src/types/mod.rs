pub mod call;
pub mod history;

pub use call::{
    CallId, CallKind, CallRecord, CallStatus, CallerProfile, EndReason, PendingCall, ProfileId,
    whole_seconds_between,
};
pub use history::{
    CallHistoryItem, CallHistoryPage, CallStats, DEFAULT_HISTORY_LIMIT, HistoryCursor,
    MAX_HISTORY_LIMIT,
};
