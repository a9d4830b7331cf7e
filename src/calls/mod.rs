//! Server-side call coordination.
//!
//! - [`CallRegistry`]: live calls and the participant index that enforces
//!   one call per profile
//! - [`Coordinator`]: applies client events, ring timeouts and disconnects
//!   to the registry, the call record store and the connection hub
//! - [`PushNotifier`]: alerts for callees that are offline when called
//! - [`CallHistory`]: per-profile history listing, stats and deletion

mod coordinator;
mod error;
mod handler;
mod history;
mod pending;
mod push;
mod registry;

pub use coordinator::{Collaborators, Coordinator};
pub use error::CoordinatorError;
pub use history::{CallHistory, HistoryError};
pub use push::{IncomingCallAlert, LoggingPushNotifier, PushNotifier};
pub use registry::{ActiveCall, CallRegistry};
