use std::fmt;

/// User-facing notice attached to degraded content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
  /// The previous screen is shown because navigation stalled offline
  StaleView,
  /// Latest data could not be fetched; cached data stays on screen
  FetchFailed,
  /// A page could not load and there is nothing to fall back to
  PageUnavailable { page_name: Option<String> },
  /// A page failed to load while online
  PageFailed { page_name: Option<String> },
}

impl Banner {
  pub fn message(&self) -> String {
    match self {
      Banner::StaleView => {
        "You are offline, so the previous screen is being shown. It will refresh automatically once you are back online.".to_string()
      }
      Banner::FetchFailed => {
        "Could not fetch the latest data because of a network error. Trying to reconnect...".to_string()
      }
      Banner::PageUnavailable { page_name: Some(name) } => format!(
        "You are offline. An internet connection is needed to show \"{}\". The page will reload once the connection is back.",
        name
      ),
      Banner::PageUnavailable { page_name: None } => {
        "You are offline. An internet connection is needed to show this page. The page will reload once the connection is back.".to_string()
      }
      Banner::PageFailed { page_name: Some(name) } => {
        format!("\"{}\" failed to load. Reload to try again.", name)
      }
      Banner::PageFailed { page_name: None } => {
        "This page failed to load. Reload to try again.".to_string()
      }
    }
  }

  /// Whether the banner offers a manual reload.
  pub fn offers_reload(&self) -> bool {
    matches!(
      self,
      Banner::PageUnavailable { .. } | Banner::PageFailed { .. }
    )
  }
}

impl fmt::Display for Banner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message())
  }
}
