//! Resource cache buckets and the strategies that read and fill them.
//!
//! - Named buckets with per-bucket capacity and age limits
//! - Oldest-insertion eviction on every write
//! - Cache-first, stale-while-revalidate and network-first strategies
//! - Basic offline mode (serve an aged-out entry when the network is gone)
//! - Persisted endpoint snapshots, read synchronously

mod layer;
mod memory;
mod storage;
mod traits;

pub use layer::{CacheLayer, Served};
pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{
  Bucket, BucketStats, CacheResult, CacheSource, CachedResponse, ResourceStore, SnapshotStore,
};
