//! Durable outbox entries for writes that never reached the origin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::Relay;
use crate::config::KeyPolicy;
use crate::error::RelayError;
use crate::net::{is_hop_by_hop, Method, Request, Transport};
use crate::store::{Collection, RecordStore};

/// Everything needed to re-issue a write exactly as it was first attempted.
///
/// Never mutated once queued: delivered entries are deleted, failed ones
/// stay as they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
  /// Idempotency key, also the record key in `unsent-writes`
  pub key: String,
  pub restaurant_id: Option<String>,
  pub author: Option<String>,
  pub rating: Option<String>,
  pub comments: Option<String>,
  pub method: String,
  pub scheme: String,
  pub host: Option<String>,
  pub port: Option<u16>,
  pub path: String,
  /// Raw query string, kept byte for byte
  pub query: Option<String>,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(default)]
  pub body: Vec<u8>,
  pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
  /// Capture a write request that could not be delivered.
  pub fn capture(request: &Request, policy: KeyPolicy) -> Self {
    let author = request.query_param("name");
    let key = match (policy, &author) {
      (KeyPolicy::Author, Some(name)) if !name.is_empty() => name.clone(),
      _ => Uuid::now_v7().to_string(),
    };

    Self {
      key,
      restaurant_id: request.query_param("restaurant_id"),
      author,
      rating: request.query_param("rating"),
      comments: request.query_param("comments"),
      method: request.method.as_str().to_string(),
      scheme: request.url.scheme().to_string(),
      host: request.url.host_str().map(String::from),
      port: request.url.port(),
      path: request.url.path().to_string(),
      query: request.url.query().map(String::from),
      headers: request
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .cloned()
        .collect(),
      body: request.body.clone(),
      created_at: Utc::now(),
    }
  }

  /// Rebuild the original request.
  ///
  /// Fails without side effects when a required parameter is missing, so
  /// the entry can stay queued.
  pub fn to_request(&self) -> Result<Request, RelayError> {
    let malformed = |missing: &'static str| RelayError::MalformedEntry {
      key: self.key.clone(),
      missing,
    };

    let host = self.host.as_deref().filter(|h| !h.is_empty()).ok_or_else(|| malformed("host"))?;
    if self.restaurant_id.as_deref().map_or(true, str::is_empty) {
      return Err(malformed("restaurant_id"));
    }
    if self.author.is_none() {
      return Err(malformed("name"));
    }
    if self.rating.is_none() {
      return Err(malformed("rating"));
    }

    let mut url =
      Url::parse(&format!("{}://{}", self.scheme, host)).map_err(|_| malformed("valid host"))?;
    url.set_port(self.port).map_err(|_| malformed("valid port"))?;
    url.set_path(&self.path);
    url.set_query(self.query.as_deref());

    Ok(Request {
      method: Method::parse(&self.method),
      url,
      headers: self.headers.clone(),
      body: self.body.clone(),
    })
  }
}

impl<S: RecordStore, T: Transport> Relay<S, T> {
  /// Writes waiting for the origin, oldest first.
  pub fn queued_writes(&self) -> Result<Vec<OutboxEntry>, RelayError> {
    let records = self.store.get_all::<OutboxEntry>(Collection::UnsentWrites)?;
    Ok(records.into_iter().map(|r| r.value).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn review(url: &str) -> Request {
    Request::post(Url::parse(url).unwrap())
  }

  #[test]
  fn test_capture_and_rebuild_exactly() {
    let original = review(
      "http://localhost:1337/reviews/?restaurant_id=6&name=abobknd%20a&rating=5&comments=ldnaklndaknd",
    );
    let entry = OutboxEntry::capture(&original, KeyPolicy::Unique);

    assert_eq!(entry.restaurant_id.as_deref(), Some("6"));
    assert_eq!(entry.author.as_deref(), Some("abobknd a"));
    assert_eq!(entry.rating.as_deref(), Some("5"));

    let rebuilt = entry.to_request().unwrap();
    assert_eq!(rebuilt.url, original.url);
    assert_eq!(rebuilt.method, Method::Post);
  }

  #[test]
  fn test_unique_keys_never_collide() {
    let req = review("http://h/reviews/?restaurant_id=1&name=Ann&rating=4");
    let a = OutboxEntry::capture(&req, KeyPolicy::Unique);
    let b = OutboxEntry::capture(&req, KeyPolicy::Unique);
    assert_ne!(a.key, b.key);
  }

  #[test]
  fn test_author_policy_keys_by_name() {
    let req = review("http://h/reviews/?restaurant_id=1&name=Ann&rating=4");
    assert_eq!(OutboxEntry::capture(&req, KeyPolicy::Author).key, "Ann");

    // no name to key by: fall back to a unique key
    let anonymous = review("http://h/reviews/?restaurant_id=1&rating=4");
    assert_ne!(OutboxEntry::capture(&anonymous, KeyPolicy::Author).key, "");
  }

  #[test]
  fn test_missing_parameters_are_malformed() {
    let req = review("http://h/reviews/?name=Ann&rating=4");
    let entry = OutboxEntry::capture(&req, KeyPolicy::Unique);
    assert!(matches!(
      entry.to_request(),
      Err(RelayError::MalformedEntry {
        missing: "restaurant_id",
        ..
      })
    ));

    let mut entry = OutboxEntry::capture(
      &review("http://h/reviews/?restaurant_id=1&name=Ann&rating=4"),
      KeyPolicy::Unique,
    );
    entry.host = None;
    assert!(matches!(
      entry.to_request(),
      Err(RelayError::MalformedEntry { missing: "host", .. })
    ));
  }

  #[test]
  fn test_serde_keeps_everything() {
    let mut req = review("http://h:1337/reviews/?restaurant_id=1&name=Ann&rating=4");
    req.headers.push(("content-type".into(), "text/plain".into()));
    req.headers.push(("connection".into(), "close".into()));
    req.body = b"hello".to_vec();
    let entry = OutboxEntry::capture(&req, KeyPolicy::Unique);

    let json = serde_json::to_string(&entry).unwrap();
    let back: OutboxEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(back, entry);
    assert_eq!(back.headers, vec![("content-type".to_string(), "text/plain".to_string())]);
    assert_eq!(back.to_request().unwrap().url.port(), Some(1337));
  }
}
