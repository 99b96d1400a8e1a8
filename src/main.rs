use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use lastgood::cache::{CacheLayer, SqliteStorage};
use lastgood::clock::SystemClock;
use lastgood::config::Config;
use lastgood::warmer::RuntimeIdle;
use lastgood::{
  json_fetcher, CacheWarmer, ClientDataCache, Endpoint, HttpNetwork, PolicyTable, Request, RequestRouter,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "lastgood")]
#[command(about = "Offline cache policy, resource buckets and endpoint snapshots for a web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lastgood/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show which cache rule a request falls under
  Classify {
    /// Absolute URL or path relative to the origin
    url: String,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Fetch through the router, using and filling the buckets
  Fetch {
    url: String,
    #[arg(long)]
    navigate: bool,
  },
  /// Prime the buckets for the configured routes
  Warm {
    /// Skip the start delay and idle wait
    #[arg(long)]
    now: bool,
  },
  /// Show an endpoint's snapshot, then revalidate it
  Endpoint { key: String },
  /// List buckets and their occupancy
  Buckets,
  /// Drop entries past their bucket's max age
  Purge,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
  // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let appender = dirs::data_dir().and_then(|dir| {
    RollingFileAppender::builder()
      .rotation(Rotation::DAILY)
      .filename_prefix("lastgood")
      .filename_suffix("log")
      .build(dir.join("lastgood").join("logs"))
      .ok()
  });
  let (file_layer, guard) = match appender {
    Some(appender) => {
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(file_layer)
    .with(filter)
    .init();

  guard
}

fn resolve(origin: &Url, raw: &str) -> Result<Url> {
  origin
    .join(raw)
    .map_err(|e| eyre!("Invalid URL {}: {}", raw, e))
}

fn build_request(url: Url, navigate: bool) -> Request {
  if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_tracing();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let origin = config.origin_url()?;
  let policy = Arc::new(PolicyTable::with_defaults(
    origin.origin(),
    &config.policy_settings()?,
  ));

  if let Command::Classify {
    url,
    navigate,
    method,
  } = &args.command
  {
    let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
    let request = build_request(resolve(&origin, url)?, *navigate).with_method(method);
    match policy.classify(&request) {
      Some(rule) => println!(
        "{}  strategy={}  bucket={} (max {} entries, {}s)",
        rule.name,
        rule.strategy,
        rule.bucket.name,
        rule.bucket.max_entries,
        rule.bucket.max_age.num_seconds()
      ),
      None => println!("no rule  strategy=network-only"),
    }
    return Ok(());
  }

  let storage = Arc::new(SqliteStorage::open(config.cache_path.as_deref())?);
  let cache = CacheLayer::new(storage.clone(), Arc::new(SystemClock));
  let network = Arc::new(HttpNetwork::new(HTTP_TIMEOUT)?);
  let router = Arc::new(RequestRouter::new(policy, cache, network));

  match args.command {
    Command::Classify { .. } => {}
    Command::Fetch { url, navigate } => {
      let request = build_request(resolve(&origin, &url)?, navigate);
      let routed = router.handle(&request).await?;
      let snapshot = &routed.response.data;
      println!(
        "{} {}  source={}  rule={}  {} bytes",
        snapshot.status,
        snapshot.url,
        routed.response.source,
        routed.rule.as_deref().unwrap_or("-"),
        snapshot.body.len()
      );
      if let Some(cached_at) = routed.response.cached_at {
        println!("cached at {}", cached_at.to_rfc3339());
      }
      if let Some(revalidation) = routed.revalidation {
        // Let the background refresh land before exiting
        revalidation.await?;
      }
    }
    Command::Warm { now } => {
      let warmer = CacheWarmer::new(router, origin, config.warm_settings())
        .with_idle(Arc::new(RuntimeIdle));
      let report = if now {
        Some(warmer.warm_now().await)
      } else {
        warmer.warm().await
      };
      if let Some(report) = report {
        for route in &report.routes {
          println!(
            "{:<16} prefetch={:<5} document={}",
            route.route, route.prefetched, route.document
          );
        }
        info!(warmed = report.fully_warmed(), "Warm finished");
      }
    }
    Command::Endpoint { key } => {
      let url = config.endpoint_url(&key)?;
      let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
      let data_cache = ClientDataCache::new(storage);
      let mut endpoint: Endpoint<serde_json::Value, _> =
        data_cache.use_endpoint(key, json_fetcher(client, url));

      match endpoint.data() {
        Some(data) => println!("cached (stale): {}", data),
        None => println!("no cached snapshot"),
      }
      endpoint.settle().await;
      if let Some(banner) = endpoint.banner() {
        eprintln!("{}", banner);
      }
      if let Some(e) = endpoint.error() {
        println!("revalidation failed: {}", e);
      } else if let Some(data) = endpoint.data() {
        println!("fresh: {}", data);
      }
    }
    Command::Buckets => {
      let stats = router.bucket_stats()?;
      if stats.is_empty() {
        println!("no cached entries");
      }
      for s in stats {
        println!(
          "{:<16} {:>5} entries  oldest {}",
          s.name,
          s.entries,
          s.oldest
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
        );
      }
    }
    Command::Purge => {
      for (bucket, count) in router.purge_expired()? {
        println!("{:<16} purged {}", bucket, count);
      }
    }
  }

  Ok(())
}
