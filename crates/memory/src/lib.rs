//! Multi-tier conversational memory for MeshBrain.
//!
//! - [`HotStore`]: in-process ring buffer of recent turns
//! - [`SqliteStore`] / [`InMemoryStore`]: the durable WARM tier
//! - [`JsonlArchive`]: the COLD archive
//! - [`MemoryManager`]: context assembly, write fan-out, sweep and export

pub mod archive;
pub mod context;
pub mod hot;
pub mod in_memory;
pub mod locks;
pub mod manager;
pub mod sqlite;
pub mod write_queue;

pub use archive::JsonlArchive;
pub use hot::HotStore;
pub use in_memory::InMemoryStore;
pub use manager::{
    MemoryManager, MemoryStats, RecordReceipt, SweepReport, TierHealth, TierPolicy, WarmStore,
    WarmWrite,
};
pub use sqlite::SqliteStore;
pub use write_queue::{QueueStats, RetryPolicy, WarmWriteQueue};
