//! Scripted transport for exercising strategies without a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::transport::Transport;
use super::types::{Request, Response, ResponseSource};
use crate::error::FetchError;

pub struct FakeTransport {
  online: AtomicBool,
  /// (method, path) -> (status, body)
  responses: Mutex<HashMap<(String, String), (u16, Vec<u8>)>>,
  /// Requests whose URL contains the fragment fail with the paired error
  failures: Mutex<Vec<(String, FetchError)>>,
  calls: Mutex<Vec<String>>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      responses: Mutex::new(HashMap::new()),
      failures: Mutex::new(Vec::new()),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, method: &str, path: &str, status: u16, body: impl Into<Vec<u8>>) {
    self
      .responses
      .lock()
      .unwrap()
      .insert((method.to_string(), path.to_string()), (status, body.into()));
  }

  fn fail_with(&self, fragment: &str, error: FetchError) {
    self
      .failures
      .lock()
      .unwrap()
      .push((fragment.to_string(), error));
  }

  /// Matching requests fail as unreachable.
  pub fn fail_matching(&self, fragment: &str) {
    self.fail_with(fragment, FetchError::Unreachable(format!("forced failure for {}", fragment)));
  }

  pub fn time_out_matching(&self, fragment: &str) {
    self.fail_with(fragment, FetchError::TimedOut(format!("forced timeout for {}", fragment)));
  }

  /// Matching requests cannot be built at all.
  pub fn reject_matching(&self, fragment: &str) {
    self.fail_with(fragment, FetchError::InvalidRequest(format!("forced rejection for {}", fragment)));
  }

  pub fn clear_failures(&self) {
    self.failures.lock().unwrap().clear();
  }

  /// Every request seen so far, as "METHOD url".
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method.as_str(), url));

    if !self.online.load(Ordering::SeqCst) {
      return Err(FetchError::Unreachable("offline".into()));
    }
    let forced = self
      .failures
      .lock()
      .unwrap()
      .iter()
      .find(|(fragment, _)| url.contains(fragment.as_str()))
      .map(|(_, error)| error.clone());
    if let Some(error) = forced {
      return Err(error);
    }

    let key = (
      request.method.as_str().to_string(),
      request.url.path().to_string(),
    );
    let (status, body) = self
      .responses
      .lock()
      .unwrap()
      .get(&key)
      .cloned()
      .unwrap_or((404, b"not found".to_vec()));

    Ok(Response::new(status, body, ResponseSource::Network))
  }
}
