//! Request router: classifies a request and runs its rule's strategy.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{BucketStats, CacheLayer, CacheResult, ResourceStore, Served};
use crate::error::OfflineError;
use crate::policy::{CacheRule, PolicyTable, Strategy};
use crate::request::{Request, ResponseSnapshot};

/// Where requests actually go. Implementations must return lazy futures:
/// nothing is sent until the future is polled.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<ResponseSnapshot, OfflineError>>;
}

/// HTTP transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self, OfflineError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("lastgood/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<ResponseSnapshot, OfflineError>> {
    let builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    async move {
      let response = builder.send().await?;
      let status = response.status().as_u16();
      let url = response.url().to_string();
      let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
      let body = response.bytes().await?;

      let snapshot = ResponseSnapshot::new(url, status, body.to_vec());
      Ok(match content_type {
        Some(ct) => snapshot.with_content_type(ct),
        None => snapshot,
      })
    }
    .boxed()
  }
}

/// A routed response.
#[derive(Debug)]
pub struct Routed {
  pub response: CacheResult<ResponseSnapshot>,
  /// Name of the matching rule; `None` means it went straight to the network
  pub rule: Option<String>,
  /// Background refresh started by a stale-while-revalidate hit
  pub revalidation: Option<JoinHandle<()>>,
}

pub struct RequestRouter<S: ResourceStore, N: Network> {
  policy: Arc<PolicyTable>,
  cache: CacheLayer<S>,
  network: Arc<N>,
}

impl<S: ResourceStore + 'static, N: Network> RequestRouter<S, N> {
  pub fn new(policy: Arc<PolicyTable>, cache: CacheLayer<S>, network: Arc<N>) -> Self {
    Self {
      policy,
      cache,
      network,
    }
  }

  pub fn policy(&self) -> &PolicyTable {
    &self.policy
  }

  pub fn classify(&self, request: &Request) -> Option<&CacheRule> {
    self.policy.classify(request)
  }

  /// Run the request through its rule's strategy.
  pub async fn handle(&self, request: &Request) -> Result<Routed, OfflineError> {
    let Some(rule) = self.policy.classify(request) else {
      debug!(url = %request.url, "No cache rule, going to network");
      let snapshot = self.network.fetch(request).await?;
      return Ok(Routed {
        response: CacheResult::from_network(snapshot),
        rule: None,
        revalidation: None,
      });
    };

    let bucket = &rule.bucket;
    let key = request.key();
    let url = request.url.as_str();

    let served = match rule.strategy {
      Strategy::CacheFirst => {
        self
          .cache
          .cache_first(bucket, &key, url, || self.network.fetch(request))
          .await?
      }
      Strategy::StaleWhileRevalidate => {
        self
          .cache
          .stale_while_revalidate(bucket, &key, url, self.network.fetch(request))
          .await?
      }
      Strategy::NetworkFirst { timeout } => {
        self
          .cache
          .network_first(bucket, &key, url, timeout, self.network.fetch(request))
          .await?
      }
      Strategy::NetworkOnly => {
        Served {
          result: CacheResult::from_network(self.network.fetch(request).await?),
          revalidation: None,
        }
      }
    };

    debug!(
      url,
      rule = %rule.name,
      source = %served.result.source,
      "Routed request"
    );

    Ok(Routed {
      response: served.result,
      rule: Some(rule.name.clone()),
      revalidation: served.revalidation,
    })
  }

  /// Drop aged-out entries from every bucket the policy writes to.
  pub fn purge_expired(&self) -> color_eyre::Result<Vec<(String, usize)>> {
    let mut purged: Vec<(String, usize)> = Vec::new();
    for bucket in self.policy.buckets() {
      if purged.iter().any(|(name, _)| *name == bucket.name) {
        continue;
      }
      let count = self.cache.purge_expired(bucket)?;
      if count > 0 {
        info!(bucket = %bucket.name, count, "Purged expired entries");
      }
      purged.push((bucket.name.clone(), count));
    }
    Ok(purged)
  }

  pub fn bucket_stats(&self) -> color_eyre::Result<Vec<BucketStats>> {
    self.cache.storage().stats()
  }
}
