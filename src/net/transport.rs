//! The single outbound network path used by strategies and outbox replay.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::types::{Request, Response, ResponseSource};
use crate::error::FetchError;

/// Headers that describe one connection and must not be forwarded.
pub fn is_hop_by_hop(name: &str) -> bool {
  matches!(
    name.to_ascii_lowercase().as_str(),
    "connection"
      | "proxy-connection"
      | "keep-alive"
      | "transfer-encoding"
      | "te"
      | "trailer"
      | "upgrade"
      | "host"
      | "content-length"
  )
}

/// Request headers passed on to the origin.
///
/// Content negotiation is left to the client so every body that comes back
/// is one it can decode.
fn is_forwarded(name: &str) -> bool {
  !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("accept-encoding")
}

/// Performs a request against the origin.
///
/// `Err` means no response was obtained. An origin error status is still `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Transport backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(FetchError::from)?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      if is_forwarded(name) {
        builder = builder.header(name.as_str(), value.as_str());
      }
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let resp = builder.send().await?;
    let status = resp.status().as_u16();
    let headers: Vec<(String, String)> = resp
      .headers()
      .iter()
      .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // A connection dropped mid-body is still "no response"
    let body = resp.bytes().await?.to_vec();

    debug!(method = %request.method.as_str(), url = %request.url, status, "Origin responded");

    Ok(Response {
      status,
      headers,
      body,
      source: ResponseSource::Network,
    })
  }
}
