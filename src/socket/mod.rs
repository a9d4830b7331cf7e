pub mod consts;
pub mod error;
pub mod hub;
pub mod server;

pub use error::SocketError;
pub use hub::{ConnectionHub, ConnectionId};
pub use server::SignalingServer;
