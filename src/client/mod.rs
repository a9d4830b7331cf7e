//! Client call runtime: the state store and the actor that drives it.

pub mod error;
pub mod runner;
pub mod signaling;
pub mod store;

#[cfg(test)]
pub(crate) mod mock;

pub use error::ClientError;
pub use runner::{CallClient, CallClientHandle, ClientCommand, ClientInput};
pub use signaling::SignalingSender;
pub use store::CallStore;
