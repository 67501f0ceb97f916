//! Durable, checksummed, versioned snapshots of all learned state.

pub mod codec;
pub mod crc;
pub mod manager;
pub mod snapshot;

pub use manager::{PersistenceManager, RestoreSource, Restored};
pub use snapshot::{AgentRecord, BreakerRecord, PersistedSnapshot, RegimeRecord};
