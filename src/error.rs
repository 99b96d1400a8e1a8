use thiserror::Error;

/// Failures surfaced by the offline layer.
///
/// None of these are fatal: callers fall back to the last known snapshot
/// or view whenever one exists. Serving stale data is not an error and is
/// reported through `CacheSource::CacheStale` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfflineError {
  #[error("Network unavailable: {0}")]
  NetworkUnavailable(String),

  #[error("No cached entry for {url} in bucket {bucket} and the network is unreachable")]
  CacheMiss { bucket: String, url: String },

  #[error("Navigation to {path} stalled while offline")]
  NavigationStalled { path: String },

  #[error("HTTP {status}: {body}")]
  Http { status: u16, body: String },

  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("Storage error: {0}")]
  Storage(String),

  #[error("Fetch aborted: {0}")]
  FetchAborted(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl OfflineError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
      None => body.to_string(),
      Some((cut, _)) => format!(
        "{}... (truncated, {} total bytes)",
        &body[..cut],
        body.len()
      ),
    }
  }

  pub fn from_status(status: u16, body: &str) -> Self {
    OfflineError::Http {
      status,
      body: Self::truncate_body(body),
    }
  }

  /// Whether this failure means "no connectivity" rather than a bad answer.
  pub fn is_offline(&self) -> bool {
    matches!(
      self,
      OfflineError::NetworkUnavailable(_) | OfflineError::CacheMiss { .. }
    )
  }
}

impl From<reqwest::Error> for OfflineError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      OfflineError::InvalidResponse(e.to_string())
    } else {
      OfflineError::NetworkUnavailable(e.to_string())
    }
  }
}

impl From<serde_json::Error> for OfflineError {
  fn from(e: serde_json::Error) -> Self {
    OfflineError::InvalidResponse(e.to_string())
  }
}
