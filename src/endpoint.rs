//! Client data cache: per-endpoint JSON snapshots with background revalidation.
//!
//! An [`Endpoint`] shows the last persisted snapshot immediately (marked
//! stale) and refreshes it from the network in the background, in the
//! spirit of SWR / TanStack Query.
//!
//! ```ignore
//! let cache = ClientDataCache::new(storage);
//! let mut home = cache.use_endpoint("home-data", json_fetcher(client, url));
//!
//! // In event loop tick
//! if home.poll() {
//!     // State changed, re-render
//! }
//!
//! // On window focus
//! home.on_focus();
//! ```
//!
//! Results are fenced per key: every fetch takes a ticket, and a result
//! only reaches storage if its ticket is newer than the last one stored.
//! A slow early fetch can therefore never overwrite a later one.
//!
//! Every accessor of a key watches that key's [`KeyStatus`]. An accessor
//! whose own fetch was suppressed picks up the result of the fetch that was
//! already running.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use url::Url;

use crate::banner::Banner;
use crate::cache::SnapshotStore;
use crate::error::OfflineError;

/// Fetch bookkeeping for one key, as seen by every accessor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStatus {
  /// Sequence number of the stored snapshot, 0 if none was stored yet
  pub committed: u64,
  pub in_flight: usize,
  /// Why the last fetch failed; cleared by the next commit
  pub last_error: Option<OfflineError>,
}

#[derive(Debug)]
struct Fence {
  issued: u64,
  committed: u64,
  in_flight: usize,
  last_error: Option<OfflineError>,
  status: watch::Sender<KeyStatus>,
}

impl Fence {
  fn new() -> Self {
    let (status, _) = watch::channel(KeyStatus::default());
    Self {
      issued: 0,
      committed: 0,
      in_flight: 0,
      last_error: None,
      status,
    }
  }

  fn release(&mut self, error: Option<OfflineError>) {
    self.in_flight = self.in_flight.saturating_sub(1);
    if error.is_some() {
      self.last_error = error;
    }
    self.publish();
  }

  fn publish(&self) {
    self.status.send_replace(KeyStatus {
      committed: self.committed,
      in_flight: self.in_flight,
      last_error: self.last_error.clone(),
    });
  }
}

type Fences = Arc<Mutex<HashMap<String, Fence>>>;

fn lock_fences(fences: &Mutex<HashMap<String, Fence>>) -> MutexGuard<'_, HashMap<String, Fence>> {
  fences.lock().unwrap_or_else(|e| e.into_inner())
}

/// Permission to run one fetch for a key. Dropping it without a commit or
/// abandon releases the key.
pub struct Ticket {
  key: String,
  seq: u64,
  fences: Fences,
  settled: bool,
}

impl Ticket {
  pub fn seq(&self) -> u64 {
    self.seq
  }
}

impl Drop for Ticket {
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    if let Some(fence) = lock_fences(&self.fences).get_mut(&self.key) {
      debug!(key = %self.key, seq = self.seq, "Fetch dropped before finishing");
      fence.release(None);
    }
  }
}

impl std::fmt::Debug for Ticket {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Ticket")
      .field("key", &self.key)
      .field("seq", &self.seq)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
  Committed,
  /// A newer ticket already committed; `latest` is its sequence number
  Superseded { latest: u64 },
}

/// Snapshot storage plus per-key fetch bookkeeping. Cheap to clone; clones
/// share state.
pub struct ClientDataCache<S: SnapshotStore> {
  store: Arc<S>,
  fences: Fences,
}

impl<S: SnapshotStore> Clone for ClientDataCache<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fences: Arc::clone(&self.fences),
    }
  }
}

impl<S: SnapshotStore + 'static> ClientDataCache<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      fences: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  fn fences(&self) -> MutexGuard<'_, HashMap<String, Fence>> {
    lock_fences(&self.fences)
  }

  /// Synchronous read of the persisted snapshot. Unreadable snapshots are
  /// treated as absent.
  pub fn read_snapshot<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let raw = match self.store.get_item(key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key, error = %e, "Failed to load cached snapshot");
        return None;
      }
    };
    match serde_json::from_str(&raw) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(key, error = %e, "Discarding unreadable snapshot");
        None
      }
    }
  }

  /// Take a ticket for a new fetch. Returns `None` while another fetch for
  /// the key is in flight, unless `force` is set.
  pub fn begin(&self, key: &str, force: bool) -> Option<Ticket> {
    let mut fences = self.fences();
    let fence = fences.entry(key.to_string()).or_insert_with(Fence::new);
    if fence.in_flight > 0 && !force {
      return None;
    }
    fence.issued += 1;
    fence.in_flight += 1;
    fence.publish();
    Some(Ticket {
      key: key.to_string(),
      seq: fence.issued,
      fences: Arc::clone(&self.fences),
      settled: false,
    })
  }

  /// Persist a fetch result unless a newer ticket got there first.
  pub fn commit<T: Serialize>(&self, mut ticket: Ticket, data: &T) -> Commit {
    ticket.settled = true;
    let mut fences = self.fences();
    let fence = fences.entry(ticket.key.clone()).or_insert_with(Fence::new);
    fence.in_flight = fence.in_flight.saturating_sub(1);

    if ticket.seq <= fence.committed {
      debug!(key = %ticket.key, seq = ticket.seq, latest = fence.committed, "Dropping superseded result");
      fence.publish();
      return Commit::Superseded {
        latest: fence.committed,
      };
    }
    fence.committed = ticket.seq;
    fence.last_error = None;

    // Written under the fence lock so storage order matches ticket order
    match serde_json::to_string(data) {
      Ok(json) => {
        if let Err(e) = self.store.set_item(&ticket.key, &json) {
          warn!(key = %ticket.key, error = %e, "Failed to persist snapshot");
        }
      }
      Err(e) => warn!(key = %ticket.key, error = %e, "Failed to serialize snapshot"),
    }
    fence.publish();
    Commit::Committed
  }

  /// Release a ticket whose fetch failed.
  pub fn abandon(&self, mut ticket: Ticket, error: OfflineError) {
    ticket.settled = true;
    if let Some(fence) = self.fences().get_mut(&ticket.key) {
      fence.release(Some(error));
    }
  }

  /// Watch fetch progress for `key`.
  pub fn subscribe(&self, key: &str) -> watch::Receiver<KeyStatus> {
    self
      .fences()
      .entry(key.to_string())
      .or_insert_with(Fence::new)
      .status
      .subscribe()
  }

  pub fn is_in_flight(&self, key: &str) -> bool {
    self.fences().get(key).is_some_and(|f| f.in_flight > 0)
  }

  /// Mount an accessor for `key`: the snapshot is shown right away and a
  /// fetch is started. Must be called within a tokio runtime.
  pub fn use_endpoint<T, F, Fut>(&self, key: impl Into<String>, fetcher: F) -> Endpoint<T, S>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, OfflineError>> + Send + 'static,
  {
    let key = key.into();
    let (sender, receiver) = mpsc::unbounded_channel();
    let mut endpoint = Endpoint {
      shared: self.subscribe(&key),
      following: false,
      key,
      cache: self.clone(),
      fetcher: Box::new(move || fetcher().boxed()),
      data: None,
      is_stale: true,
      error: None,
      applied_seq: 0,
      pending: 0,
      sender,
      receiver,
    };
    endpoint.mount();
    endpoint
  }
}

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, OfflineError>> + Send + Sync>;

#[derive(Debug)]
enum Outcome<T> {
  Fresh { seq: u64, data: T },
  Superseded { latest: u64 },
  Failed(OfflineError),
}

/// Live view of one endpoint: `data`, `is_stale` and `error`.
pub struct Endpoint<T, S: SnapshotStore> {
  key: String,
  cache: ClientDataCache<S>,
  fetcher: FetcherFn<T>,
  data: Option<T>,
  is_stale: bool,
  error: Option<OfflineError>,
  /// Ticket of the data currently shown
  applied_seq: u64,
  pending: usize,
  /// Another accessor's fetch for the key was running when ours was due
  following: bool,
  shared: watch::Receiver<KeyStatus>,
  sender: mpsc::UnboundedSender<Outcome<T>>,
  receiver: mpsc::UnboundedReceiver<Outcome<T>>,
}

impl<T, S> Endpoint<T, S>
where
  T: Serialize + DeserializeOwned + Send + 'static,
  S: SnapshotStore + 'static,
{
  fn mount(&mut self) {
    self.data = self.cache.read_snapshot(&self.key);
    self.is_stale = true;
    self.fetch();
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  /// True until a fetch made by this accessor has succeeded.
  pub fn is_stale(&self) -> bool {
    self.is_stale
  }

  pub fn error(&self) -> Option<&OfflineError> {
    self.error.as_ref()
  }

  pub fn is_fetching(&self) -> bool {
    self.pending > 0 || self.following
  }

  /// Banner to show above the data, if any.
  pub fn banner(&self) -> Option<Banner> {
    self.error.as_ref().map(|_| Banner::FetchFailed)
  }

  /// Start a fetch unless one is already in flight for this key.
  ///
  /// Returns whether a fetch was started.
  pub fn fetch(&mut self) -> bool {
    self.start(false)
  }

  /// Revalidate when the window regains focus.
  pub fn on_focus(&mut self) -> bool {
    self.fetch()
  }

  /// Start a fetch even if one is in flight. Whichever started last wins.
  pub fn refetch(&mut self) -> bool {
    self.start(true)
  }

  fn start(&mut self, force: bool) -> bool {
    let Some(ticket) = self.cache.begin(&self.key, force) else {
      debug!(key = %self.key, "Fetch already in flight, following it");
      self.following = true;
      return false;
    };
    self.pending += 1;

    let future = AssertUnwindSafe((self.fetcher)()).catch_unwind();
    let cache = self.cache.clone();
    let tx = self.sender.clone();
    tokio::spawn(async move {
      let outcome = match future.await {
        Ok(Ok(data)) => {
          let seq = ticket.seq();
          match cache.commit(ticket, &data) {
            Commit::Committed => Outcome::Fresh { seq, data },
            Commit::Superseded { latest } => Outcome::Superseded { latest },
          }
        }
        Ok(Err(e)) => {
          cache.abandon(ticket, e.clone());
          Outcome::Failed(e)
        }
        Err(_) => {
          let e = OfflineError::FetchAborted("fetcher panicked".to_string());
          warn!(key = %ticket.key, "Endpoint fetcher panicked");
          cache.abandon(ticket, e.clone());
          Outcome::Failed(e)
        }
      };
      // Ignore send errors - the endpoint may have been dropped
      let _ = tx.send(outcome);
    });
    true
  }

  /// Apply finished fetches without blocking.
  ///
  /// Returns `true` if the state changed. Call this in the event loop tick.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(outcome) = self.receiver.try_recv() {
      self.apply(outcome);
      changed = true;
    }
    self.sync_shared() || changed
  }

  /// Wait for every fetch started or followed so far to finish and apply
  /// the results.
  pub async fn settle(&mut self) {
    loop {
      self.poll();
      if self.pending == 0 && !self.following {
        break;
      }
      tokio::select! {
        outcome = self.receiver.recv(), if self.pending > 0 => match outcome {
          Some(outcome) => self.apply(outcome),
          None => break,
        },
        changed = self.shared.changed(), if self.following => {
          if changed.is_err() {
            break;
          }
        }
        else => break,
      }
    }
  }

  /// Pick up snapshots stored by other accessors of the key.
  fn sync_shared(&mut self) -> bool {
    let status = self.shared.borrow_and_update().clone();
    let mut changed = false;
    let mut refreshed = false;
    if status.committed > self.applied_seq {
      if let Some(data) = self.cache.read_snapshot(&self.key) {
        self.show(data, status.committed);
        changed = true;
        refreshed = true;
      }
    }
    if self.following && status.in_flight == 0 {
      self.following = false;
      changed = true;
      if let Some(e) = status.last_error.filter(|_| !refreshed) {
        debug!(key = %self.key, error = %e, "Shared fetch failed, keeping cached data");
        self.error = Some(e);
      }
    }
    changed
  }

  fn show(&mut self, data: T, seq: u64) {
    self.data = Some(data);
    self.applied_seq = seq;
    self.is_stale = false;
    self.error = None;
  }

  fn apply(&mut self, outcome: Outcome<T>) {
    self.pending = self.pending.saturating_sub(1);
    match outcome {
      Outcome::Fresh { seq, data } => {
        if seq > self.applied_seq {
          self.show(data, seq);
        }
      }
      Outcome::Superseded { latest } => {
        // Someone stored something newer; show that instead
        if latest > self.applied_seq {
          if let Some(data) = self.cache.read_snapshot(&self.key) {
            self.show(data, latest);
          }
        }
      }
      Outcome::Failed(e) => {
        debug!(key = %self.key, error = %e, "Endpoint fetch failed, keeping cached data");
        self.error = Some(e);
      }
    }
  }
}

impl<T: std::fmt::Debug, S: SnapshotStore> std::fmt::Debug for Endpoint<T, S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Endpoint")
      .field("key", &self.key)
      .field("data", &self.data)
      .field("is_stale", &self.is_stale)
      .field("error", &self.error)
      .field("pending", &self.pending)
      .field("following", &self.following)
      .finish_non_exhaustive()
  }
}

/// Fetcher that GETs `url` and decodes a JSON body. Non-2xx answers are
/// errors.
pub fn json_fetcher<T>(
  client: reqwest::Client,
  url: Url,
) -> impl Fn() -> BoxFuture<'static, Result<T, OfflineError>> + Send + Sync + 'static
where
  T: DeserializeOwned + Send + 'static,
{
  move || {
    let request = client.get(url.clone());
    async move {
      let response = request.send().await?;
      let status = response.status();
      let body = response.text().await?;
      if !status.is_success() {
        return Err(OfflineError::from_status(status.as_u16(), &body));
      }
      Ok(serde_json::from_str(&body)?)
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use serde::Deserialize;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tokio::sync::oneshot;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Home {
    next_event: String,
  }

  fn home(next_event: &str) -> Home {
    Home {
      next_event: next_event.to_string(),
    }
  }

  fn cache() -> (ClientDataCache<MemoryStorage>, Arc<MemoryStorage>) {
    let store = Arc::new(MemoryStorage::new());
    (ClientDataCache::new(store.clone()), store)
  }

  type Replies = Arc<Mutex<VecDeque<oneshot::Receiver<Result<Home, OfflineError>>>>>;

  /// Fetcher whose calls each wait for a reply sent by the test.
  fn scripted() -> (
    impl Fn() -> BoxFuture<'static, Result<Home, OfflineError>> + Send + Sync + 'static,
    Replies,
  ) {
    let replies: Replies = Arc::new(Mutex::new(VecDeque::new()));
    let queue = replies.clone();
    let fetcher = move || {
      let next = queue.lock().unwrap().pop_front();
      async move {
        match next {
          Some(rx) => rx
            .await
            .unwrap_or_else(|_| Err(OfflineError::NetworkUnavailable("dropped".into()))),
          None => Err(OfflineError::NetworkUnavailable("no reply scripted".into())),
        }
      }
      .boxed()
    };
    (fetcher, replies)
  }

  fn expect_call(replies: &Replies) -> oneshot::Sender<Result<Home, OfflineError>> {
    let (tx, rx) = oneshot::channel();
    replies.lock().unwrap().push_back(rx);
    tx
  }

  #[tokio::test]
  async fn test_mount_shows_snapshot_as_stale() {
    let (cache, store) = cache();
    store
      .set_item("home-data", &serde_json::to_string(&home("Ski day")).unwrap())
      .unwrap();
    let (fetcher, replies) = scripted();
    let reply = expect_call(&replies);

    let mut ep = cache.use_endpoint("home-data", fetcher);
    assert_eq!(ep.data(), Some(&home("Ski day")));
    assert!(ep.is_stale());
    assert!(ep.is_fetching());

    reply.send(Ok(home("Onsen"))).unwrap();
    ep.settle().await;
    assert_eq!(ep.data(), Some(&home("Onsen")));
    assert!(!ep.is_stale());
    assert!(ep.error().is_none());
    assert_eq!(cache.read_snapshot::<Home>("home-data"), Some(home("Onsen")));
  }

  #[tokio::test]
  async fn test_failure_keeps_data_and_sets_error() {
    let (cache, store) = cache();
    store
      .set_item("itinerary-data", &serde_json::to_string(&home("Day 1")).unwrap())
      .unwrap();
    let (fetcher, replies) = scripted();
    let reply = expect_call(&replies);

    let mut ep = cache.use_endpoint("itinerary-data", fetcher);
    reply
      .send(Err(OfflineError::NetworkUnavailable("offline".into())))
      .unwrap();
    ep.settle().await;

    assert_eq!(ep.data(), Some(&home("Day 1")));
    assert!(ep.is_stale());
    assert!(matches!(ep.error(), Some(OfflineError::NetworkUnavailable(_))));
    assert_eq!(ep.banner(), Some(Banner::FetchFailed));
    assert!(!cache.is_in_flight("itinerary-data"));

    // A later success clears the error
    let reply = expect_call(&replies);
    assert!(ep.on_focus());
    reply.send(Ok(home("Day 2"))).unwrap();
    ep.settle().await;
    assert!(ep.error().is_none());
    assert!(ep.banner().is_none());
    assert!(!ep.is_stale());
  }

  #[tokio::test]
  async fn test_no_snapshot_mounts_empty() {
    let (cache, _) = cache();
    let (fetcher, replies) = scripted();
    let _reply = expect_call(&replies);

    let ep: Endpoint<Home, _> = cache.use_endpoint("accounting-data", fetcher);
    assert!(ep.data().is_none());
    assert!(ep.is_stale());
  }

  #[tokio::test]
  async fn test_in_flight_fetch_suppresses_new_ones() {
    let (cache, _) = cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut ep = cache.use_endpoint("home-data", move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(home("Ski day"))
      }
    });

    assert!(!ep.on_focus());
    assert!(!ep.fetch());
    // Same key from another accessor is suppressed too; it follows the
    // running fetch instead
    let mut other = cache.use_endpoint("home-data", || async { Ok(home("other")) });
    assert!(other.is_fetching());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    ep.settle().await;
    other.settle().await;
    assert_eq!(other.data(), Some(&home("Ski day")));
    assert!(ep.on_focus());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_suppressed_accessor_gets_running_fetch_result() {
    let (cache, store) = cache();
    store
      .set_item("home-data", &serde_json::to_string(&home("old")).unwrap())
      .unwrap();
    let (fetcher, replies) = scripted();
    let reply = expect_call(&replies);

    let mut a = cache.use_endpoint("home-data", fetcher);
    let mut b = cache.use_endpoint("home-data", || async { Ok(home("unused")) });
    assert_eq!(b.data(), Some(&home("old")));
    assert!(b.is_stale());

    reply.send(Ok(home("new"))).unwrap();
    a.settle().await;
    b.settle().await;
    for ep in [&a, &b] {
      assert_eq!(ep.data(), Some(&home("new")));
      assert!(!ep.is_stale());
      assert!(!ep.is_fetching());
    }
  }

  #[tokio::test]
  async fn test_suppressed_accessor_sees_running_fetch_failure() {
    let (cache, store) = cache();
    store
      .set_item("home-data", &serde_json::to_string(&home("old")).unwrap())
      .unwrap();
    let (fetcher, replies) = scripted();
    let reply = expect_call(&replies);

    let _a = cache.use_endpoint("home-data", fetcher);
    let mut b = cache.use_endpoint("home-data", || async { Ok(home("unused")) });
    reply
      .send(Err(OfflineError::NetworkUnavailable("offline".into())))
      .unwrap();
    b.settle().await;

    assert_eq!(b.data(), Some(&home("old")));
    assert!(b.is_stale());
    assert_eq!(b.banner(), Some(Banner::FetchFailed));
  }

  #[tokio::test]
  async fn test_panicking_fetcher_releases_key() {
    let (cache, _) = cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut ep = cache.use_endpoint("home-data", move || {
      let call = counter.fetch_add(1, Ordering::SeqCst);
      async move {
        if call == 0 {
          panic!("fetcher bug");
        }
        Ok(home("Ski day"))
      }
    });

    ep.settle().await;
    assert!(matches!(ep.error(), Some(OfflineError::FetchAborted(_))));
    assert!(!cache.is_in_flight("home-data"));

    assert!(ep.on_focus());
    ep.settle().await;
    assert_eq!(ep.data(), Some(&home("Ski day")));
    assert!(ep.error().is_none());
  }

  #[test]
  fn test_dropped_ticket_releases_key() {
    let (cache, _) = cache();
    let ticket = cache.begin("k", false).unwrap();
    assert!(cache.is_in_flight("k"));
    drop(ticket);
    assert!(!cache.is_in_flight("k"));

    let next = cache.begin("k", false).unwrap();
    assert_eq!(cache.commit(next, &1), Commit::Committed);
    let status = cache.subscribe("k").borrow().clone();
    assert_eq!(status.committed, 2);
    assert_eq!(status.in_flight, 0);
  }

  #[tokio::test]
  async fn test_earlier_fetch_resolving_late_does_not_overwrite() {
    let (cache, _) = cache();
    let (fetcher, replies) = scripted();
    let first = expect_call(&replies);
    let second = expect_call(&replies);

    let mut ep = cache.use_endpoint("home-data", fetcher);
    assert!(ep.refetch());

    second.send(Ok(home("newer"))).unwrap();
    while !ep.poll() {
      tokio::task::yield_now().await;
    }
    assert_eq!(ep.data(), Some(&home("newer")));
    assert!(ep.is_fetching());

    first.send(Ok(home("older"))).unwrap();
    ep.settle().await;

    assert_eq!(ep.data(), Some(&home("newer")));
    assert_eq!(cache.read_snapshot::<Home>("home-data"), Some(home("newer")));
    assert!(!cache.is_in_flight("home-data"));
  }

  #[tokio::test]
  async fn test_poll_applies_results() {
    let (cache, _) = cache();
    let mut ep = cache.use_endpoint("home-data", || async { Ok(home("Ski day")) });
    assert!(!ep.poll());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(ep.poll());
    assert_eq!(ep.data(), Some(&home("Ski day")));
    assert!(!ep.is_fetching());
  }

  #[test]
  fn test_fence_orders_commits() {
    let (cache, _) = cache();
    let a = cache.begin("k", false).unwrap();
    assert!(cache.begin("k", false).is_none());
    let b = cache.begin("k", true).unwrap();

    assert_eq!(cache.commit(b, &1), Commit::Committed);
    assert_eq!(cache.commit(a, &0), Commit::Superseded { latest: 2 });
    assert_eq!(cache.read_snapshot::<i32>("k"), Some(1));
    assert!(cache.begin("k", false).is_some());
  }

  #[test]
  fn test_unreadable_snapshot_is_ignored() {
    let (cache, store) = cache();
    store.set_item("home-data", "{not json").unwrap();
    assert_eq!(cache.read_snapshot::<Home>("home-data"), None);
  }
}
