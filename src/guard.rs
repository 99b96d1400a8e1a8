//! Navigation continuity guard.
//!
//! Keeps the last successfully rendered view around. When a route change
//! stalls while offline (the new view never renders within the grace
//! period), the previous view is shown again with a banner instead of a
//! blank screen. Once connectivity is back the consumer is told to do a
//! hard reload.
//!
//! The guard is driven entirely by events from the render layer and never
//! sleeps: call [`NavigationGuard::poll`] from the event loop tick, using
//! [`NavigationGuard::next_deadline`] to know when the timer is due.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::banner::Banner;
use crate::clock::Clock;
use crate::error::OfflineError;

pub const DEFAULT_GRACE: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
  Stable,
  PendingNavigation,
  ShowingStale,
}

/// What the consumer must do after feeding the guard an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
  None,
  /// Put the last good view back on screen, with the stale banner
  ShowStale,
  /// The page failed to load and there is nothing to fall back to
  ShowFallback,
  /// Reload the whole page
  HardReload,
}

/// Per-session navigation state.
#[derive(Debug, Clone)]
pub struct NavigationState<V> {
  pub current_path: String,
  pub last_good_view: Option<V>,
  pub last_good_path: String,
  pub pending_navigation: bool,
  pub is_online: bool,
  pub is_showing_stale: bool,
}

/// What should be on screen right now.
#[derive(Debug, PartialEq, Eq)]
pub enum Display<'a, V> {
  /// Render the current route normally
  Live,
  Stale { view: &'a V, banner: Banner },
  Fallback(Banner),
}

#[derive(Debug, Clone)]
struct GraceTimer {
  path: String,
  deadline: DateTime<Utc>,
}

/// A page that failed to load, and whether we were offline at the time.
#[derive(Debug, Clone)]
struct PageFailure {
  page_name: Option<String>,
  offline: bool,
}

enum GuardEvent<V> {
  PathChanged(String),
  Rendered { path: String, view: V },
  RenderFailed { page_name: Option<String> },
  Connectivity { online: bool, was_online: bool },
  TimerFired { path: String },
}

pub struct NavigationGuard<V> {
  state: NavigationState<V>,
  phase: GuardState,
  timer: Option<GraceTimer>,
  grace: chrono::Duration,
  clock: Arc<dyn Clock>,
  mounted: bool,
  failure: Option<PageFailure>,
}

impl<V> NavigationGuard<V> {
  pub fn new(initial_path: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
    let path = initial_path.into();
    Self {
      state: NavigationState {
        current_path: path.clone(),
        last_good_view: None,
        last_good_path: path,
        pending_navigation: false,
        is_online: true,
        is_showing_stale: false,
      },
      phase: GuardState::Stable,
      timer: None,
      grace: to_chrono(DEFAULT_GRACE),
      clock,
      mounted: false,
      failure: None,
    }
  }

  pub fn with_grace(mut self, grace: Duration) -> Self {
    self.grace = to_chrono(grace);
    self
  }

  /// Start observing. Calling it again while mounted only refreshes the
  /// connectivity flag.
  pub fn mount(&mut self, is_online: bool) {
    self.state.is_online = is_online;
    if self.mounted {
      return;
    }
    self.mounted = true;
    debug!(path = %self.state.current_path, is_online, "Navigation guard mounted");
  }

  /// Stop observing and drop the timer. Safe to call repeatedly.
  pub fn unmount(&mut self) {
    self.timer = None;
    if self.mounted {
      self.mounted = false;
      debug!("Navigation guard unmounted");
    }
  }

  pub fn is_mounted(&self) -> bool {
    self.mounted
  }

  /// The active route changed.
  pub fn on_path_change(&mut self, path: impl Into<String>) -> GuardAction {
    self.handle(GuardEvent::PathChanged(path.into()))
  }

  /// A view for `path` finished rendering. Renders for a route that is no
  /// longer current are ignored.
  pub fn on_render(&mut self, path: &str, view: V) -> GuardAction {
    self.handle(GuardEvent::Rendered {
      path: path.to_string(),
      view,
    })
  }

  /// The view for the current route failed to load.
  pub fn on_render_failed(&mut self, page_name: Option<&str>) -> GuardAction {
    self.handle(GuardEvent::RenderFailed {
      page_name: page_name.filter(|n| !n.is_empty()).map(str::to_string),
    })
  }

  /// Connectivity changed.
  pub fn on_connectivity(&mut self, online: bool) -> GuardAction {
    let was_online = std::mem::replace(&mut self.state.is_online, online);
    self.handle(GuardEvent::Connectivity { online, was_online })
  }

  /// Fire the grace timer if it is due.
  pub fn poll(&mut self) -> GuardAction {
    let now = self.clock.now();
    match self.timer.take() {
      Some(timer) if now >= timer.deadline => self.handle(GuardEvent::TimerFired { path: timer.path }),
      pending => {
        self.timer = pending;
        GuardAction::None
      }
    }
  }

  pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
    self.timer.as_ref().map(|t| t.deadline)
  }

  pub fn state(&self) -> GuardState {
    self.phase
  }

  pub fn navigation_state(&self) -> &NavigationState<V> {
    &self.state
  }

  pub fn display(&self) -> Display<'_, V> {
    if self.phase == GuardState::ShowingStale {
      if let Some(view) = &self.state.last_good_view {
        return Display::Stale {
          view,
          banner: Banner::StaleView,
        };
      }
    }
    match &self.failure {
      Some(PageFailure {
        page_name,
        offline: true,
      }) => Display::Fallback(Banner::PageUnavailable {
        page_name: page_name.clone(),
      }),
      Some(PageFailure {
        page_name,
        offline: false,
      }) => Display::Fallback(Banner::PageFailed {
        page_name: page_name.clone(),
      }),
      None => Display::Live,
    }
  }

  /// Every transition goes through here.
  fn handle(&mut self, event: GuardEvent<V>) -> GuardAction {
    if !self.mounted {
      return GuardAction::None;
    }

    match (self.phase, event) {
      (_, GuardEvent::PathChanged(path)) if path == self.state.current_path => GuardAction::None,
      (_, GuardEvent::PathChanged(path)) => {
        self.state.current_path = path.clone();
        self.failure = None;
        if path == self.state.last_good_path && self.state.last_good_view.is_some() {
          // Back where we last rendered; the view on record is the right one
          self.transition(GuardState::Stable);
          return GuardAction::None;
        }
        self.transition(GuardState::PendingNavigation);
        self.timer = (!self.state.is_online).then(|| GraceTimer {
          deadline: self.clock.now() + self.grace,
          path,
        });
        GuardAction::None
      }

      (_, GuardEvent::Rendered { path, .. }) if path != self.state.current_path => GuardAction::None,
      (phase, GuardEvent::Rendered { path, view }) => {
        self.state.last_good_view = Some(view);
        self.state.last_good_path = path;
        self.failure = None;
        if phase == GuardState::ShowingStale {
          info!(path = %self.state.current_path, "Navigation recovered, leaving stale view");
        }
        self.transition(GuardState::Stable);
        GuardAction::None
      }

      (_, GuardEvent::RenderFailed { page_name }) => {
        let offline = !self.state.is_online;
        if offline
          && self.state.last_good_view.is_some()
          && self.state.last_good_path != self.state.current_path
        {
          self.transition(GuardState::ShowingStale);
          return GuardAction::ShowStale;
        }
        self.timer = None;
        warn!(path = %self.state.current_path, page = ?page_name, offline, "Page failed to load, showing fallback");
        self.failure = Some(PageFailure { page_name, offline });
        GuardAction::ShowFallback
      }

      (phase, GuardEvent::Connectivity { online: true, was_online: false }) => {
        let offline_failure = matches!(&self.failure, Some(f) if f.offline);
        if phase != GuardState::ShowingStale && !offline_failure {
          return GuardAction::None;
        }
        info!(path = %self.state.current_path, "Back online, reloading");
        self.failure = None;
        self.transition(GuardState::Stable);
        GuardAction::HardReload
      }
      (_, GuardEvent::Connectivity { .. }) => GuardAction::None,

      (GuardState::PendingNavigation, GuardEvent::TimerFired { path })
        if path == self.state.current_path
          && !self.state.is_online
          && self.state.last_good_view.is_some() =>
      {
        let error = OfflineError::NavigationStalled { path };
        warn!(error = %error, showing = %self.state.last_good_path, "Showing previous view");
        self.transition(GuardState::ShowingStale);
        GuardAction::ShowStale
      }
      (_, GuardEvent::TimerFired { .. }) => GuardAction::None,
    }
  }

  /// Moves to `next`, keeping the navigation flags in step. The grace timer
  /// only lives while a navigation is pending.
  fn transition(&mut self, next: GuardState) {
    if self.phase != next {
      debug!(from = ?self.phase, to = ?next, path = %self.state.current_path, "Guard transition");
    }
    self.phase = next;
    self.state.pending_navigation = next == GuardState::PendingNavigation;
    self.state.is_showing_stale = next == GuardState::ShowingStale;
    if next != GuardState::PendingNavigation {
      self.timer = None;
    }
  }
}

fn to_chrono(d: Duration) -> chrono::Duration {
  chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
