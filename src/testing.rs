//! Test doubles shared by the unit test modules.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::OfflineError;
use crate::request::{Request, ResponseSnapshot};
use crate::router::Network;

#[derive(Default)]
struct State {
  responses: Mutex<HashMap<String, ResponseSnapshot>>,
  requested: Mutex<Vec<String>>,
  calls: AtomicUsize,
  offline: AtomicBool,
  gate: Mutex<Option<Arc<Notify>>>,
}

/// Network that answers from a script. Unknown URLs get a 200 whose body
/// is the request path.
#[derive(Clone, Default)]
pub(crate) struct ScriptedNetwork {
  state: Arc<State>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self
      .state
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), ResponseSnapshot::new(url, status, body));
  }

  pub fn set_offline(&self, offline: bool) {
    self.state.offline.store(offline, Ordering::SeqCst);
  }

  /// Hold every fetch until the returned handle is notified.
  pub fn gate(&self) -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    *self.state.gate.lock().unwrap() = Some(notify.clone());
    notify
  }

  pub fn calls(&self) -> usize {
    self.state.calls.load(Ordering::SeqCst)
  }

  pub fn requested(&self) -> Vec<String> {
    self.state.requested.lock().unwrap().clone()
  }
}

impl Network for ScriptedNetwork {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<ResponseSnapshot, OfflineError>> {
    let state = self.state.clone();
    let url = request.url.to_string();
    let path = request.url.path().to_string();

    async move {
      state.calls.fetch_add(1, Ordering::SeqCst);
      state.requested.lock().unwrap().push(url.clone());

      let gate = state.gate.lock().unwrap().clone();
      if let Some(gate) = gate {
        gate.notified().await;
      }

      if state.offline.load(Ordering::SeqCst) {
        return Err(OfflineError::NetworkUnavailable("scripted offline".into()));
      }
      let scripted = state.responses.lock().unwrap().get(&url).cloned();
      Ok(scripted.unwrap_or_else(|| ResponseSnapshot::new(url, 200, path)))
    }
    .boxed()
  }
}
