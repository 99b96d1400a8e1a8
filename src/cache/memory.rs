//! In-process storage. Lives as long as the process, like a browser tab's
//! caches; also the test double for the SQLite backend.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::traits::{BucketStats, CachedResponse, ResourceStore, SnapshotStore};
use crate::request::{RequestKey, ResponseSnapshot};

#[derive(Debug, Default)]
struct MemoryBucket {
  entries: HashMap<RequestKey, (u64, CachedResponse)>,
  /// Insertion sequence -> key, oldest first
  order: BTreeMap<u64, RequestKey>,
  next_seq: u64,
}

impl MemoryBucket {
  fn remove(&mut self, key: &RequestKey) -> bool {
    match self.entries.remove(key) {
      Some((seq, _)) => {
        self.order.remove(&seq);
        true
      }
      None => false,
    }
  }
}

#[derive(Debug, Default)]
struct Inner {
  buckets: HashMap<String, MemoryBucket>,
  items: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
  inner: Mutex<Inner>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl ResourceStore for MemoryStorage {
  fn get(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let inner = self.lock()?;
    Ok(
      inner
        .buckets
        .get(bucket)
        .and_then(|b| b.entries.get(key))
        .map(|(_, cached)| cached.clone()),
    )
  }

  fn put(
    &self,
    bucket: &str,
    key: &RequestKey,
    snapshot: &ResponseSnapshot,
    inserted_at: DateTime<Utc>,
    max_entries: usize,
  ) -> Result<Vec<RequestKey>> {
    let mut inner = self.lock()?;
    let b = inner.buckets.entry(bucket.to_string()).or_default();

    // Overwriting counts as a fresh insertion
    b.remove(key);
    let seq = b.next_seq;
    b.next_seq += 1;
    b.order.insert(seq, key.clone());
    b.entries.insert(
      key.clone(),
      (
        seq,
        CachedResponse {
          snapshot: snapshot.clone(),
          inserted_at,
        },
      ),
    );

    let mut evicted = Vec::new();
    while b.entries.len() > max_entries {
      let Some((_, oldest)) = b.order.pop_first() else {
        break;
      };
      b.entries.remove(&oldest);
      evicted.push(oldest);
    }
    Ok(evicted)
  }

  fn evict(&self, bucket: &str, key: &RequestKey) -> Result<bool> {
    let mut inner = self.lock()?;
    Ok(
      inner
        .buckets
        .get_mut(bucket)
        .map(|b| b.remove(key))
        .unwrap_or(false),
    )
  }

  fn len(&self, bucket: &str) -> Result<usize> {
    let inner = self.lock()?;
    Ok(inner.buckets.get(bucket).map(|b| b.entries.len()).unwrap_or(0))
  }

  fn purge_older_than(&self, bucket: &str, cutoff: DateTime<Utc>) -> Result<usize> {
    let mut inner = self.lock()?;
    let Some(b) = inner.buckets.get_mut(bucket) else {
      return Ok(0);
    };
    let expired: Vec<RequestKey> = b
      .entries
      .iter()
      .filter(|(_, (_, cached))| cached.inserted_at < cutoff)
      .map(|(key, _)| key.clone())
      .collect();
    for key in &expired {
      b.remove(key);
    }
    Ok(expired.len())
  }

  fn stats(&self) -> Result<Vec<BucketStats>> {
    let inner = self.lock()?;
    let mut stats: Vec<BucketStats> = inner
      .buckets
      .iter()
      .map(|(name, b)| BucketStats {
        name: name.clone(),
        entries: b.entries.len(),
        oldest: b.entries.values().map(|(_, c)| c.inserted_at).min(),
      })
      .collect();
    stats.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(stats)
  }
}

impl SnapshotStore for MemoryStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock()?.items.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self
      .lock()?
      .items
      .insert(key.to_string(), value.to_string());
    Ok(())
  }
}
