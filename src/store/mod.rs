pub mod memory;

pub use memory::{MemoryCallRecordStore, MemoryPendingCallStore, MemoryProfileDirectory};
pub use sigcore::store::{CallRecordStore, PendingCallStore, ProfileDirectory, StoreError};
