//! Call signaling: the server-side coordinator and its WebSocket front end,
//! plus the client-side call runtime.

pub mod calls;
pub mod client;
pub mod config;
pub mod socket;
pub mod store;

pub use sigcore::{protocol, types};
