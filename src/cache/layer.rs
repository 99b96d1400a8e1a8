//! Cache layer that orchestrates caching strategies with network fetching.

use chrono::DateTime;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::{Bucket, CacheResult, CachedResponse, ResourceStore};
use crate::clock::Clock;
use crate::error::OfflineError;
use crate::request::{RequestKey, ResponseSnapshot};

/// Outcome of a strategy run. A stale-while-revalidate hit carries the
/// handle of the background refresh it started.
#[derive(Debug)]
pub struct Served {
  pub result: CacheResult<ResponseSnapshot>,
  pub revalidation: Option<JoinHandle<()>>,
}

impl Served {
  fn now(result: CacheResult<ResponseSnapshot>) -> Self {
    Self {
      result,
      revalidation: None,
    }
  }
}

/// Cache layer that runs bucket strategies around a network fetcher.
///
/// Storage failures never fail a request: the cache is skipped and the
/// failure is logged.
pub struct CacheLayer<S: ResourceStore> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
}

impl<S: ResourceStore + 'static> CacheLayer<S> {
  pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  fn lookup(&self, bucket: &Bucket, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.get(&bucket.name, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(bucket = %bucket.name, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, bucket: &Bucket, key: &RequestKey, snapshot: &ResponseSnapshot) {
    store_snapshot(&*self.storage, &*self.clock, bucket, key, snapshot);
  }

  /// Serve a fresh cached entry if there is one; otherwise fetch and store.
  ///
  /// An aged-out entry is still better than nothing when the network is
  /// down, so it is served as `Offline` in that case.
  pub async fn cache_first<F, Fut>(
    &self,
    bucket: &Bucket,
    key: &RequestKey,
    url: &str,
    fetcher: F,
  ) -> Result<Served, OfflineError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResponseSnapshot, OfflineError>>,
  {
    let cached = self.lookup(bucket, key);
    if let Some(hit) = &cached {
      if !hit.is_expired(self.clock.now(), bucket.max_age) {
        return Ok(Served::now(CacheResult::from_cache(
          hit.snapshot.clone(),
          hit.inserted_at,
          false,
        )));
      }
    }

    match fetcher().await {
      Ok(snapshot) => {
        self.store(bucket, key, &snapshot);
        Ok(Served::now(CacheResult::from_network(snapshot)))
      }
      Err(e) => fallback(bucket, url, cached, e),
    }
  }

  /// Serve whatever is cached right away, age notwithstanding, and refresh
  /// the entry in the background. With nothing cached, wait for the network.
  pub async fn stale_while_revalidate<Fut>(
    &self,
    bucket: &Bucket,
    key: &RequestKey,
    url: &str,
    fetch: Fut,
  ) -> Result<Served, OfflineError>
  where
    Fut: Future<Output = Result<ResponseSnapshot, OfflineError>> + Send + 'static,
  {
    match self.lookup(bucket, key) {
      Some(hit) => {
        let stale = hit.is_expired(self.clock.now(), bucket.max_age);
        let revalidation = self.spawn_revalidation(bucket.clone(), key.clone(), fetch);
        Ok(Served {
          result: CacheResult::from_cache(hit.snapshot, hit.inserted_at, stale),
          revalidation: Some(revalidation),
        })
      }
      None => match fetch.await {
        Ok(snapshot) => {
          self.store(bucket, key, &snapshot);
          Ok(Served::now(CacheResult::from_network(snapshot)))
        }
        Err(e) => fallback(bucket, url, None, e),
      },
    }
  }

  /// Try the network first, bounded by `timeout`; fall back to any cached
  /// entry when it fails or is too slow.
  pub async fn network_first<Fut>(
    &self,
    bucket: &Bucket,
    key: &RequestKey,
    url: &str,
    timeout: Duration,
    fetch: Fut,
  ) -> Result<Served, OfflineError>
  where
    Fut: Future<Output = Result<ResponseSnapshot, OfflineError>>,
  {
    let error = match tokio::time::timeout(timeout, fetch).await {
      Ok(Ok(snapshot)) => {
        self.store(bucket, key, &snapshot);
        return Ok(Served::now(CacheResult::from_network(snapshot)));
      }
      Ok(Err(e)) => e,
      Err(_) => OfflineError::NetworkUnavailable(format!(
        "no response within {}ms",
        timeout.as_millis()
      )),
    };
    fallback(bucket, url, self.lookup(bucket, key), error)
  }

  fn spawn_revalidation<Fut>(&self, bucket: Bucket, key: RequestKey, fetch: Fut) -> JoinHandle<()>
  where
    Fut: Future<Output = Result<ResponseSnapshot, OfflineError>> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let clock = Arc::clone(&self.clock);

    tokio::spawn(async move {
      match fetch.await {
        Ok(snapshot) => store_snapshot(&*storage, &*clock, &bucket, &key, &snapshot),
        Err(e) => {
          debug!(bucket = %bucket.name, error = %e, "Background revalidation failed");
        }
      }
    })
  }

  /// Drop entries past their bucket's max age. Returns how many went.
  pub fn purge_expired(&self, bucket: &Bucket) -> color_eyre::Result<usize> {
    let cutoff = self.clock.now() - bucket.max_age;
    self.storage.purge_older_than(&bucket.name, cutoff)
  }
}

impl<S: ResourceStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }
}

/// Network failed: serve the cached entry if we have one.
fn fallback(
  bucket: &Bucket,
  url: &str,
  cached: Option<CachedResponse>,
  error: OfflineError,
) -> Result<Served, OfflineError> {
  match cached {
    Some(hit) => {
      debug!(bucket = %bucket.name, url, error = %error, "Network failed, serving cached entry");
      Ok(Served::now(CacheResult::offline(hit.snapshot, hit.inserted_at)))
    }
    None if error.is_offline() => Err(OfflineError::CacheMiss {
      bucket: bucket.name.clone(),
      url: url.to_string(),
    }),
    None => Err(error),
  }
}

/// Only successful responses are stored; anything else leaves the bucket alone.
fn store_snapshot<S: ResourceStore + ?Sized>(
  storage: &S,
  clock: &dyn Clock,
  bucket: &Bucket,
  key: &RequestKey,
  snapshot: &ResponseSnapshot,
) {
  if !snapshot.is_success() {
    debug!(bucket = %bucket.name, status = snapshot.status, "Not caching non-success response");
    return;
  }

  match storage.put(&bucket.name, key, snapshot, clock.now(), bucket.max_entries) {
    Ok(evicted) if !evicted.is_empty() => {
      debug!(bucket = %bucket.name, evicted = evicted.len(), "Evicted oldest entries");
    }
    Ok(_) => {}
    Err(e) => warn!(bucket = %bucket.name, error = %e, "Failed to store cache entry"),
  }
}
