//! Runtime-agnostic core of call signaling: wire protocol, call data model,
//! collaborator store traits, and the client negotiation state machines.

pub mod client;
pub mod protocol;
pub mod store;
pub mod types;

/// Ring timeout applied from offer acceptance.
pub const RING_TIMEOUT_SECS: u64 = 90;
