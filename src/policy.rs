//! Request classification: which strategy and which bucket a GET request
//! goes through. The first matching rule wins, so order is the priority.

use chrono::Duration as AgeDuration;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Origin;

use crate::cache::Bucket;
use crate::request::{Destination, Request, RequestFacts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  StaleWhileRevalidate,
  /// Network bounded by `timeout`, cached entry as fallback
  NetworkFirst { timeout: Duration },
  NetworkOnly,
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Strategy::CacheFirst => f.write_str("cache-first"),
      Strategy::StaleWhileRevalidate => f.write_str("stale-while-revalidate"),
      Strategy::NetworkFirst { timeout } => {
        write!(f, "network-first ({}ms)", timeout.as_millis())
      }
      Strategy::NetworkOnly => f.write_str("network-only"),
    }
  }
}

/// Pure predicate over the request facts.
pub type Matcher = Arc<dyn Fn(&RequestFacts<'_>) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct CacheRule {
  pub name: String,
  pub strategy: Strategy,
  pub bucket: Bucket,
  matcher: Matcher,
}

impl CacheRule {
  pub fn new<M>(name: impl Into<String>, strategy: Strategy, bucket: Bucket, matcher: M) -> Self
  where
    M: Fn(&RequestFacts<'_>) -> bool + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      strategy,
      bucket,
      matcher: Arc::new(matcher),
    }
  }

  pub fn matches(&self, facts: &RequestFacts<'_>) -> bool {
    (self.matcher)(facts)
  }
}

impl fmt::Debug for CacheRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheRule")
      .field("name", &self.name)
      .field("strategy", &self.strategy)
      .field("bucket", &self.bucket)
      .finish_non_exhaustive()
  }
}

/// Knobs for the built-in rule set.
#[derive(Debug, Clone)]
pub struct PolicySettings {
  /// Query parameter that marks a router payload request
  pub payload_marker: String,
  /// Same-origin path prefixes that are never page navigations
  pub excluded_prefixes: Vec<String>,
  pub page_timeout: Duration,
  /// Bucket limits, replaced wholesale by name
  pub bucket_overrides: Vec<Bucket>,
}

impl Default for PolicySettings {
  fn default() -> Self {
    Self {
      payload_marker: "_rsc".to_string(),
      excluded_prefixes: vec!["/api/".into(), "/_next/".into(), "/static/".into()],
      page_timeout: Duration::from_secs(3),
      bucket_overrides: Vec::new(),
    }
  }
}

impl PolicySettings {
  fn bucket(&self, name: &str, max_entries: usize, max_age: AgeDuration) -> Bucket {
    self
      .bucket_overrides
      .iter()
      .find(|b| b.name == name)
      .cloned()
      .unwrap_or_else(|| Bucket::new(name, max_entries, max_age))
  }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"];

/// Router payload requests: same origin, marker query parameter present.
pub fn payload_rule(marker: impl Into<String>, bucket: Bucket) -> CacheRule {
  let marker = marker.into();
  CacheRule::new(
    "payloads",
    Strategy::StaleWhileRevalidate,
    bucket,
    move |req| req.is_same_origin() && req.has_query_param(&marker),
  )
}

/// Page navigations, minus anything another rule or the server owns.
pub fn navigation_rule(
  marker: impl Into<String>,
  excluded_prefixes: Vec<String>,
  strategy: Strategy,
  bucket: Bucket,
) -> CacheRule {
  let marker = marker.into();
  CacheRule::new("pages", strategy, bucket, move |req| {
    if !req.is_navigation || req.has_query_param(&marker) {
      return false;
    }
    let reserved = req.is_same_origin()
      && excluded_prefixes
        .iter()
        .any(|prefix| req.path().starts_with(prefix.as_str()));
    !reserved
  })
}

/// The built-in rule list, highest priority first.
pub fn default_rules(settings: &PolicySettings) -> Vec<CacheRule> {
  vec![
    payload_rule(
      settings.payload_marker.clone(),
      settings.bucket("payloads", 32, AgeDuration::hours(24)),
    ),
    CacheRule::new(
      "images",
      Strategy::CacheFirst,
      settings.bucket("images", 64, AgeDuration::days(30)),
      |req| req.destination == Destination::Image || req.has_extension(IMAGE_EXTENSIONS),
    ),
    CacheRule::new(
      "manifest",
      Strategy::StaleWhileRevalidate,
      settings.bucket("manifest", 4, AgeDuration::days(7)),
      |req| {
        req.destination == Destination::Manifest
          || (req.is_same_origin() && req.path().ends_with(".webmanifest"))
          || (req.is_same_origin() && req.path() == "/manifest.json")
      },
    ),
    CacheRule::new(
      "static-assets",
      Strategy::StaleWhileRevalidate,
      settings.bucket("static-assets", 64, AgeDuration::hours(24)),
      |req| req.is_same_origin() && req.path().starts_with("/_next/static/"),
    ),
    navigation_rule(
      settings.payload_marker.clone(),
      settings.excluded_prefixes.clone(),
      Strategy::NetworkFirst {
        timeout: settings.page_timeout,
      },
      settings.bucket("pages", 32, AgeDuration::hours(24)),
    ),
  ]
}

/// Ordered rule list bound to the page origin.
#[derive(Debug, Clone)]
pub struct PolicyTable {
  origin: Origin,
  rules: Vec<CacheRule>,
}

impl PolicyTable {
  pub fn new(origin: Origin, rules: Vec<CacheRule>) -> Self {
    Self { origin, rules }
  }

  pub fn with_defaults(origin: Origin, settings: &PolicySettings) -> Self {
    Self::new(origin, default_rules(settings))
  }

  pub fn origin(&self) -> &Origin {
    &self.origin
  }

  pub fn rules(&self) -> &[CacheRule] {
    &self.rules
  }

  /// First rule accepting the request. `None` means network-only.
  pub fn classify(&self, request: &Request) -> Option<&CacheRule> {
    if request.method != reqwest::Method::GET {
      return None;
    }
    let facts = request.facts(&self.origin);
    self.rules.iter().find(|rule| rule.matches(&facts))
  }

  /// Every bucket the table can write to, in rule order.
  pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
    self.rules.iter().map(|r| &r.bucket)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn origin() -> Origin {
    Url::parse("https://trip.example").unwrap().origin()
  }

  fn url(s: &str) -> Url {
    Url::parse("https://trip.example").unwrap().join(s).unwrap()
  }

  fn table() -> PolicyTable {
    PolicyTable::with_defaults(origin(), &PolicySettings::default())
  }

  fn rule_name(table: &PolicyTable, req: &Request) -> Option<String> {
    table.classify(req).map(|r| r.name.clone())
  }

  fn small_bucket(name: &str) -> Bucket {
    Bucket::new(name, 8, AgeDuration::hours(1))
  }

  #[test]
  fn test_default_priorities() {
    let t = table();
    assert_eq!(
      rule_name(&t, &Request::get(url("/itinerary?_rsc=abc"))).as_deref(),
      Some("payloads")
    );
    assert_eq!(
      rule_name(&t, &Request::get(url("/icons/icon-192.png"))).as_deref(),
      Some("images")
    );
    assert_eq!(
      rule_name(&t, &Request::get(url("/manifest.webmanifest"))).as_deref(),
      Some("manifest")
    );
    assert_eq!(
      rule_name(&t, &Request::get(url("/_next/static/chunks/app.js"))).as_deref(),
      Some("static-assets")
    );
    assert_eq!(
      rule_name(&t, &Request::navigate(url("/accounting"))).as_deref(),
      Some("pages")
    );
  }

  #[test]
  fn test_navigation_rule_exclusions() {
    let t = table();
    assert_eq!(rule_name(&t, &Request::navigate(url("/api/home-data"))), None);
    assert_eq!(rule_name(&t, &Request::navigate(url("/static/doc.pdf"))), None);
    // Same URL without navigation mode is just a fetch
    assert_eq!(rule_name(&t, &Request::get(url("/accounting"))), None);
    // Other origins are not subject to the prefix exclusions
    let foreign = Request::navigate(Url::parse("https://maps.example/api/tiles").unwrap());
    assert_eq!(rule_name(&t, &foreign).as_deref(), Some("pages"));
  }

  #[test]
  fn test_only_get_is_classified() {
    let t = table();
    let post = Request::navigate(url("/accounting")).with_method(Method::POST);
    assert!(t.classify(&post).is_none());
    let head = Request::get(url("/logo.png")).with_method(Method::HEAD);
    assert!(t.classify(&head).is_none());
  }

  #[test]
  fn test_first_match_wins() {
    let rules = vec![
      CacheRule::new("first", Strategy::CacheFirst, small_bucket("a"), |_| true),
      CacheRule::new("second", Strategy::NetworkOnly, small_bucket("b"), |_| true),
    ];
    let t = PolicyTable::new(origin(), rules);
    assert_eq!(rule_name(&t, &Request::get(url("/x"))).as_deref(), Some("first"));
  }

  #[test]
  fn test_payload_navigation_goes_to_payload_rule() {
    let rules = vec![
      payload_rule("_x", small_bucket("payloads")),
      navigation_rule(
        "_x",
        vec!["/api/".into(), "/_next/".into()],
        Strategy::NetworkFirst {
          timeout: Duration::from_secs(3),
        },
        small_bucket("pages"),
      ),
    ];
    let t = PolicyTable::new(origin(), rules);

    let req = Request::navigate(url("/page?_x=1"));
    assert_eq!(rule_name(&t, &req).as_deref(), Some("payloads"));
    assert_eq!(rule_name(&t, &Request::navigate(url("/page"))).as_deref(), Some("pages"));
  }

  #[test]
  fn test_misordered_payload_rule_is_shadowed() {
    // A navigation matcher that forgets the marker exclusion, placed first,
    // swallows payload navigations. This is the misconfiguration to catch.
    let careless_nav = CacheRule::new(
      "pages",
      Strategy::NetworkFirst {
        timeout: Duration::from_secs(3),
      },
      small_bucket("pages"),
      |req| req.is_navigation,
    );
    let misordered = PolicyTable::new(
      origin(),
      vec![careless_nav.clone(), payload_rule("_rsc", small_bucket("payloads"))],
    );
    let req = Request::navigate(url("/itinerary?_rsc=1"));
    assert_eq!(rule_name(&misordered, &req).as_deref(), Some("pages"));

    let ordered = PolicyTable::new(
      origin(),
      vec![payload_rule("_rsc", small_bucket("payloads")), careless_nav],
    );
    assert_eq!(rule_name(&ordered, &req).as_deref(), Some("payloads"));

    // The shipped navigation rule refuses payload requests on its own,
    // so the default table is safe even if reordered.
    let mut rules = default_rules(&PolicySettings::default());
    rules.reverse();
    let reversed = PolicyTable::new(origin(), rules);
    assert_ne!(rule_name(&reversed, &req).as_deref(), Some("pages"));
  }

  #[test]
  fn test_bucket_overrides() {
    let settings = PolicySettings {
      bucket_overrides: vec![Bucket::new("images", 10, AgeDuration::days(1))],
      ..Default::default()
    };
    let t = PolicyTable::with_defaults(origin(), &settings);
    let images = t.buckets().find(|b| b.name == "images").unwrap();
    assert_eq!(images.max_entries, 10);
    let pages = t.buckets().find(|b| b.name == "pages").unwrap();
    assert_eq!(pages.max_entries, 32);
  }
}
