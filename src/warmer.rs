//! Primes the resource buckets for a fixed list of routes, once per session.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::ResourceStore;
use crate::request::Request;
use crate::router::{Network, RequestRouter};

/// Source of "the host is idle now" signals.
pub trait IdleScheduler: Send + Sync {
  /// `None` when the host has no idle notification; the warmer then falls
  /// back to a plain delay.
  fn when_idle(&self) -> Option<BoxFuture<'static, ()>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoIdleCallback;

impl IdleScheduler for NoIdleCallback {
  fn when_idle(&self) -> Option<BoxFuture<'static, ()>> {
    None
  }
}

/// Idle as soon as the runtime has had a chance to run everything else
/// that is ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeIdle;

impl IdleScheduler for RuntimeIdle {
  fn when_idle(&self) -> Option<BoxFuture<'static, ()>> {
    Some(tokio::task::yield_now().boxed())
  }
}

#[derive(Debug, Clone)]
pub struct WarmSettings {
  pub routes: Vec<String>,
  /// Wait before doing anything, so startup traffic goes first
  pub delay: Duration,
  /// Used instead of the idle signal when there is none
  pub idle_fallback: Duration,
  pub payload_marker: String,
}

impl Default for WarmSettings {
  fn default() -> Self {
    Self {
      routes: vec![
        "/accounting".into(),
        "/itinerary".into(),
        "/location".into(),
        "/".into(),
      ],
      delay: Duration::from_secs(3),
      idle_fallback: Duration::from_secs(2),
      payload_marker: "_rsc".into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteWarm {
  pub route: String,
  pub prefetched: bool,
  pub document: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
  pub routes: Vec<RouteWarm>,
}

impl WarmReport {
  /// Routes where both requests succeeded.
  pub fn fully_warmed(&self) -> usize {
    self
      .routes
      .iter()
      .filter(|r| r.prefetched && r.document)
      .count()
  }
}

pub struct CacheWarmer<S: ResourceStore, N: Network> {
  router: Arc<RequestRouter<S, N>>,
  origin: Url,
  settings: WarmSettings,
  idle: Arc<dyn IdleScheduler>,
  started: AtomicBool,
}

impl<S: ResourceStore + 'static, N: Network + 'static> CacheWarmer<S, N> {
  pub fn new(router: Arc<RequestRouter<S, N>>, origin: Url, settings: WarmSettings) -> Self {
    Self {
      router,
      origin,
      settings,
      idle: Arc::new(NoIdleCallback),
      started: AtomicBool::new(false),
    }
  }

  pub fn with_idle(mut self, idle: Arc<dyn IdleScheduler>) -> Self {
    self.idle = idle;
    self
  }

  /// Wait for the start delay and an idle moment, then warm every route.
  ///
  /// Only the first call in a session does anything; later calls return
  /// `None` right away.
  pub async fn warm(&self) -> Option<WarmReport> {
    if self.started.swap(true, Ordering::SeqCst) {
      debug!("Cache already warmed this session");
      return None;
    }

    tokio::time::sleep(self.settings.delay).await;
    match self.idle.when_idle() {
      Some(idle) => idle.await,
      None => tokio::time::sleep(self.settings.idle_fallback).await,
    }
    Some(self.warm_now().await)
  }

  pub fn spawn(self: Arc<Self>) -> JoinHandle<Option<WarmReport>> {
    tokio::spawn(async move { self.warm().await })
  }

  /// One best-effort pass over the routes, no delay and no retries.
  pub async fn warm_now(&self) -> WarmReport {
    info!(routes = self.settings.routes.len(), "Warming cache for offline access");

    let mut report = WarmReport::default();
    for route in &self.settings.routes {
      let url = match self.origin.join(route) {
        Ok(url) => url,
        Err(e) => {
          debug!(route = %route, error = %e, "Skipping unparseable route");
          continue;
        }
      };

      let mut payload_url = url.clone();
      payload_url
        .query_pairs_mut()
        .append_pair(&self.settings.payload_marker, "1");

      let prefetched = self.attempt(route, Request::get(payload_url)).await;
      let document = self.attempt(route, Request::navigate(url)).await;
      report.routes.push(RouteWarm {
        route: route.clone(),
        prefetched,
        document,
      });
    }

    debug!(warmed = report.fully_warmed(), total = report.routes.len(), "Cache warm pass done");
    report
  }

  async fn attempt(&self, route: &str, request: Request) -> bool {
    match self.router.handle(&request).await {
      Ok(routed) => routed.response.data.is_success(),
      Err(e) => {
        debug!(route, url = %request.url, error = %e, "Failed to warm cache");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheLayer, MemoryStorage};
  use crate::clock::SystemClock;
  use crate::policy::{PolicySettings, PolicyTable};
  use crate::testing::ScriptedNetwork;
  use tokio::time::Instant;

  fn origin() -> Url {
    Url::parse("https://trip.example").unwrap()
  }

  fn warmer() -> (CacheWarmer<MemoryStorage, ScriptedNetwork>, ScriptedNetwork) {
    let net = ScriptedNetwork::new();
    let policy = PolicyTable::with_defaults(origin().origin(), &PolicySettings::default());
    let cache = CacheLayer::new(Arc::new(MemoryStorage::new()), Arc::new(SystemClock));
    let router = RequestRouter::new(Arc::new(policy), cache, Arc::new(net.clone()));
    let warmer = CacheWarmer::new(Arc::new(router), origin(), WarmSettings::default());
    (warmer, net)
  }

  #[tokio::test(start_paused = true)]
  async fn test_warm_waits_then_fetches_every_route() {
    let (warmer, net) = warmer();
    let started = Instant::now();

    let report = warmer.warm().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(report.routes.len(), 4);
    assert_eq!(report.fully_warmed(), 4);
    assert_eq!(net.calls(), 8);

    let requested = net.requested();
    assert!(requested.contains(&"https://trip.example/itinerary?_rsc=1".to_string()));
    assert!(requested.contains(&"https://trip.example/itinerary".to_string()));

    let stats = warmer.router.bucket_stats().unwrap();
    let entries = |name: &str| stats.iter().find(|s| s.name == name).map(|s| s.entries);
    assert_eq!(entries("payloads"), Some(4));
    assert_eq!(entries("pages"), Some(4));
  }

  #[tokio::test(start_paused = true)]
  async fn test_warm_runs_once_per_session() {
    let (warmer, net) = warmer();
    assert!(warmer.warm().await.is_some());
    assert!(warmer.warm().await.is_none());
    assert_eq!(net.calls(), 8);
  }

  #[tokio::test(start_paused = true)]
  async fn test_idle_signal_replaces_fallback_delay() {
    let (warmer, _) = warmer();
    let warmer = Arc::new(warmer.with_idle(Arc::new(RuntimeIdle)));
    let started = Instant::now();

    warmer.clone().spawn().await.unwrap().unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(5));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failures_are_swallowed() {
    let (warmer, net) = warmer();
    net.set_offline(true);

    let report = warmer.warm().await.unwrap();
    assert_eq!(report.routes.len(), 4);
    assert_eq!(report.fully_warmed(), 0);
    assert!(report.routes.iter().all(|r| !r.prefetched && !r.document));
    // Single pass, no retries
    assert_eq!(net.calls(), 8);
  }
}
