/// Query parameter of the upgrade request carrying the authenticated profile id.
pub const PROFILE_QUERY_PARAM: &str = "profile";

/// Outbound messages buffered per connection before delivery counts as failed.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
