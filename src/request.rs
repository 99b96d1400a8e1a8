//! Request and response shapes seen by the policy table and the buckets.

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::{Origin, Url};

use crate::error::OfflineError;

/// How the request was issued. Only `Navigate` marks a page navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  Navigate,
  #[default]
  Cors,
  NoCors,
  SameOrigin,
}

/// What the response will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Image,
  Manifest,
  Script,
  Style,
  Font,
  #[default]
  Empty,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl Request {
  /// Plain GET (fetch/XHR style).
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      destination: Destination::default(),
    }
  }

  /// Top-level page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
      destination: Destination::Document,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Identity used as the bucket key.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }

  /// The narrow view handed to rule matchers.
  pub fn facts<'a>(&'a self, page_origin: &'a Origin) -> RequestFacts<'a> {
    RequestFacts {
      method: &self.method,
      url: &self.url,
      is_navigation: self.is_navigation(),
      destination: self.destination,
      page_origin,
    }
  }
}

/// Everything a matcher may look at. The page origin is passed in
/// explicitly rather than read from global state.
#[derive(Debug, Clone, Copy)]
pub struct RequestFacts<'a> {
  pub method: &'a Method,
  pub url: &'a Url,
  pub is_navigation: bool,
  pub destination: Destination,
  pub page_origin: &'a Origin,
}

impl RequestFacts<'_> {
  pub fn is_same_origin(&self) -> bool {
    self.url.origin() == *self.page_origin
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn has_query_param(&self, name: &str) -> bool {
    self.url.query_pairs().any(|(k, _)| k == name)
  }

  /// Case-insensitive check of the last path segment's extension.
  pub fn has_extension(&self, extensions: &[&str]) -> bool {
    let last = self.path().rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
      Some((_, ext)) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
      None => false,
    }
  }
}

/// Stable, fixed-length identity of a request (method + URL without fragment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let input = format!("{} {}", method.as_str(), url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn from_hash(hash: impl Into<String>) -> Self {
    Self(hash.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// A captured response, as stored in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.into(),
      status,
      content_type: None,
      body: body.into(),
    }
  }

  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }

  /// Only 2xx responses are worth keeping.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, OfflineError> {
    Ok(serde_json::from_slice(&self.body)?)
  }
}
