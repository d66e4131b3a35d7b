//! Per-resource serving strategies.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::outbox::OutboxEntry;
use super::Relay;
use crate::cache::{image_key, request_key};
use crate::error::{FetchError, RelayError};
use crate::net::{Method, Request, Response, ResponseSource, Transport, OUTCOME_HEADER};
use crate::store::{Collection, RecordStore};

/// Fixed key of the persisted restaurant listing.
pub const LISTING_KEY: &str = "restaurants-json";

impl<S: RecordStore, T: Transport> Relay<S, T> {
  /// Shell documents: `document` out of the shell region, every app page shares it.
  pub(super) async fn serve_shell(
    &self,
    document: &str,
    request: &Request,
  ) -> Result<Response, RelayError> {
    let url = self
      .config
      .upstream
      .app
      .join(document)
      .map_err(|e| FetchError::InvalidRequest(format!("shell document {}: {}", document, e)))?;

    let mut shell_request = Request::get(url);
    shell_request.headers = request.headers.clone();

    let key = request_key(&shell_request.url);
    let region = self.config.regions.shell.clone();
    self.cache_first(&region, &key, &shell_request).await
  }

  /// Images: one entry per logical image, whatever density was asked for.
  pub(super) async fn serve_image(&self, request: &Request) -> Result<Response, RelayError> {
    let key = image_key(&request.url);
    let region = self.config.regions.images.clone();
    self.cache_first(&region, &key, request).await
  }

  pub(super) async fn serve_map(&self, request: &Request) -> Result<Response, RelayError> {
    let key = request_key(&request.url);
    let region = self.config.regions.map.clone();
    self.cache_first(&region, &key, request).await
  }

  /// Cache-first: a hit never touches the network; a miss populates the region.
  async fn cache_first(
    &self,
    region_name: &str,
    key: &str,
    request: &Request,
  ) -> Result<Response, RelayError> {
    let region = self.regions.open(region_name)?;

    if let Some(hit) = region.match_key(key)? {
      debug!(region = region_name, key, "Region hit");
      return Ok(hit);
    }

    let response = self.fetch(request).await?;

    // HEAD bodies are empty and error pages are not the resource
    if request.method == Method::Get && response.is_success() {
      if let Err(e) = region.put(key, &response) {
        warn!(region = region_name, key, error = %e, "Failed to populate region");
      }
    }

    Ok(response)
  }

  /// Anything unclassified: any region that already has it, else the network.
  pub(super) async fn passthrough(&self, request: &Request) -> Result<Response, RelayError> {
    if request.method.is_read() {
      if let Some(hit) = self.regions.match_any(&request_key(&request.url))? {
        return Ok(hit);
      }
    }
    self.fetch(request).await
  }

  pub(super) async fn serve_listing(&self, request: &Request) -> Result<Response, RelayError> {
    self
      .network_first(request, Collection::Restaurants, Some(LISTING_KEY.to_string()))
      .await
  }

  pub(super) async fn serve_reviews(&self, request: &Request) -> Result<Response, RelayError> {
    let restaurant_id = request.query_param("restaurant_id").filter(|id| !id.is_empty());
    self
      .network_first(request, Collection::Reviews, restaurant_id)
      .await
  }

  /// Network-first with the record store as fallback.
  ///
  /// Only a successful, decodable response is persisted; failures never
  /// write or delete anything.
  async fn network_first(
    &self,
    request: &Request,
    collection: Collection,
    key: Option<String>,
  ) -> Result<Response, RelayError> {
    match self.fetch(request).await {
      Ok(response) if response.is_success() => {
        if let Some(key) = &key {
          match serde_json::from_slice::<Value>(&response.body) {
            Ok(value) => {
              if let Err(e) = self.store.put(collection, key, &value) {
                warn!(collection = %collection, key = %key, error = %e, "Failed to persist response");
              }
            }
            Err(e) => {
              debug!(collection = %collection, key = %key, error = %e, "Response is not JSON, not persisted");
            }
          }
        }
        Ok(response)
      }
      Ok(response) => {
        warn!(
          collection = %collection,
          status = response.status,
          "Origin returned an error, trying persisted copy"
        );
        Ok(self.persisted(collection, key.as_deref())?.unwrap_or(response))
      }
      Err(err) => match self.persisted(collection, key.as_deref())? {
        Some(fallback) => {
          info!(collection = %collection, key = ?key, error = %err, "Serving persisted copy");
          Ok(fallback)
        }
        None => {
          let what = match key {
            Some(key) => format!("{} {}", collection, key),
            None => collection.to_string(),
          };
          warn!(%what, error = %err, "Origin unreachable and nothing persisted");
          Err(RelayError::NoData(what))
        }
      },
    }
  }

  /// The stored copy as a synthesized success response.
  fn persisted(
    &self,
    collection: Collection,
    key: Option<&str>,
  ) -> Result<Option<Response>, RelayError> {
    let Some(key) = key else {
      return Ok(None);
    };
    let value: Option<Value> = self.store.get(collection, key)?;
    Ok(value.map(|value| Response::json(200, &value, ResponseSource::Store)))
  }

  /// Write with durable fallback: queue the write if the origin is unreachable.
  ///
  /// An origin that answers, even with an error, gets the final word. A
  /// request the transport cannot even build is returned, never queued.
  pub(super) async fn submit_review(&self, request: &Request) -> Result<Response, RelayError> {
    match self.fetch(request).await {
      Ok(response) => Ok(response),
      Err(RelayError::Network(err @ (FetchError::Unreachable(_) | FetchError::TimedOut(_)))) => {
        let entry = OutboxEntry::capture(request, self.config.outbox.key_policy);
        self.store.put(Collection::UnsentWrites, &entry.key, &entry)?;
        info!(key = %entry.key, error = %err, "Origin unreachable, write queued");

        let body = json!({ "queued": true, "key": entry.key });
        Ok(Response::json(202, &body, ResponseSource::Relay).with_header(OUTCOME_HEADER, "queued"))
      }
      Err(other) => Err(other),
    }
  }

  /// Replay trigger route: drain the outbox and report.
  pub(super) async fn replay_response(&self) -> Result<Response, RelayError> {
    let report = self.replay_outbox().await?;
    let body = serde_json::to_value(&report).unwrap_or(Value::Null);
    Ok(Response::json(200, &body, ResponseSource::Relay))
  }
}
