//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;

use crate::request::{RequestKey, ResponseSnapshot};

/// A named bucket and its eviction limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
  pub name: String,
  /// Capacity; the oldest insertion is evicted first
  pub max_entries: usize,
  /// Entries older than this are a miss on read
  pub max_age: Duration,
}

impl Bucket {
  pub fn new(name: impl Into<String>, max_entries: usize, max_age: Duration) -> Self {
    Self {
      name: name.into(),
      max_entries,
      max_age,
    }
  }
}

/// A bucket entry as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub snapshot: ResponseSnapshot,
  pub inserted_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
    now - self.inserted_at > max_age
  }
}

/// Per-bucket occupancy, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStats {
  pub name: String,
  pub entries: usize,
  pub oldest: Option<DateTime<Utc>>,
}

/// Storage backend for resource buckets.
pub trait ResourceStore: Send + Sync {
  /// Read an entry. Age is not checked here.
  fn get(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite an entry, then evict the oldest insertions until
  /// the bucket holds at most `max_entries`. Returns the evicted keys.
  fn put(
    &self,
    bucket: &str,
    key: &RequestKey,
    snapshot: &ResponseSnapshot,
    inserted_at: DateTime<Utc>,
    max_entries: usize,
  ) -> Result<Vec<RequestKey>>;

  /// Remove one entry. Returns whether it existed.
  fn evict(&self, bucket: &str, key: &RequestKey) -> Result<bool>;

  fn len(&self, bucket: &str) -> Result<usize>;

  /// Drop every entry inserted before `cutoff`.
  fn purge_older_than(&self, bucket: &str, cutoff: DateTime<Utc>) -> Result<usize>;

  fn stats(&self) -> Result<Vec<BucketStats>>;
}

/// Synchronous key-value storage for endpoint snapshots.
pub trait SnapshotStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn is_from_cache(&self) -> bool {
    self.source != CacheSource::Network
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its max age; a revalidation is in progress
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      CacheSource::Network => "network",
      CacheSource::CacheFresh => "cache (fresh)",
      CacheSource::CacheStale => "cache (stale, revalidating)",
      CacheSource::Offline => "cache (offline fallback)",
    };
    f.write_str(label)
  }
}
