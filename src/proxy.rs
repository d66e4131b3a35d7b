//! Local HTTP proxy putting the relay between the application and its origins.
//!
//! Accepts absolute-form requests (the app configured with this as its HTTP
//! proxy) as well as origin-form requests (the app pointed straight at the
//! listen address).

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{FetchError, RelayError};
use crate::net::{
  is_hop_by_hop, Method, Request, Response, ResponseSource, Transport, SOURCE_HEADER,
};
use crate::relay::{Relay, Router};
use crate::store::RecordStore;

/// Bind `listen` and serve until the task is dropped.
pub async fn run<S, T>(relay: Arc<Relay<S, T>>, listen: SocketAddr) -> Result<()>
where
  S: RecordStore + 'static,
  T: Transport + 'static,
{
  let listener = TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;

  info!(
    listen = %listen,
    app = %relay.config().upstream.app,
    api = %relay.config().upstream.api,
    "Relay listening"
  );

  serve(relay, listener).await;
  Ok(())
}

/// Accept connections on an already bound listener.
pub async fn serve<S, T>(relay: Arc<Relay<S, T>>, listener: TcpListener)
where
  S: RecordStore + 'static,
  T: Transport + 'static,
{
  loop {
    match listener.accept().await {
      Ok((stream, addr)) => {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
          let io = TokioIo::new(stream);

          let service = service_fn(move |req| {
            let relay = Arc::clone(&relay);
            async move { handle_request(relay, req).await }
          });

          if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            debug!(peer = %addr, error = ?err, "Connection closed with error");
          }
        });
      }
      Err(e) => {
        error!(error = %e, "Failed to accept connection");
      }
    }
  }
}

async fn handle_request<S: RecordStore, T: Transport>(
  relay: Arc<Relay<S, T>>,
  req: hyper::Request<Incoming>,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
  let result = match into_request(relay.config(), relay.router(), req).await {
    Ok(request) => relay.handle(request).await,
    Err(e) => Err(e),
  };

  let response = match result {
    Ok(response) => response,
    Err(e) => {
      warn!(error = %e, "Request failed");
      error_response(&e)
    }
  };

  Ok(into_hyper(response))
}

/// Convert an incoming hyper request into a relay request.
async fn into_request(
  config: &Config,
  router: &Router,
  req: hyper::Request<Incoming>,
) -> Result<Request, RelayError> {
  let (parts, body) = req.into_parts();
  let method = Method::parse(parts.method.as_str());
  let url = resolve_url(config, router, &method, &parts.uri)?;

  let headers = parts
    .headers
    .iter()
    .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = body
    .collect()
    .await
    .map_err(|e| FetchError::InvalidRequest(format!("unreadable body: {}", e)))?
    .to_bytes()
    .to_vec();

  Ok(Request {
    method,
    url,
    headers,
    body,
  })
}

/// Work out the full URL a request was meant for.
///
/// Absolute-form targets are taken as-is. Origin-form targets are resolved
/// against the app origin, then moved to the API origin when they route to
/// an API endpoint.
fn resolve_url(config: &Config, router: &Router, method: &Method, uri: &Uri) -> Result<Url, RelayError> {
  if uri.scheme().is_some() {
    return Url::parse(&uri.to_string())
      .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", uri, e)).into());
  }

  let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
  let on_app = config
    .upstream
    .app
    .join(target)
    .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", target, e)))?;

  if !router.classify(method, &on_app).is_api() {
    return Ok(on_app);
  }

  config
    .upstream
    .api
    .join(target)
    .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", target, e)).into())
}

fn error_response(e: &RelayError) -> Response {
  Response::json(
    e.status(),
    &serde_json::json!({ "error": e.to_string() }),
    ResponseSource::Relay,
  )
}

fn into_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
  let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

  let mut builder = hyper::Response::builder()
    .status(status)
    .header(SOURCE_HEADER, response.source.as_str());
  for (name, value) in &response.headers {
    if !is_hop_by_hop(name) {
      builder = builder.header(name.as_str(), value.as_str());
    }
  }

  match builder.body(Full::new(Bytes::from(response.body))) {
    Ok(resp) => resp,
    Err(e) => {
      // A stored header that hyper refuses; answer without the headers
      warn!(error = %e, "Dropping unrepresentable response headers");
      let mut resp = hyper::Response::new(Full::new(Bytes::new()));
      *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
      resp
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::OUTCOME_HEADER;
  use crate::relay::testing::relay;
  use crate::store::Collection;
  use serde_json::json;

  /// Serve a test relay on an ephemeral port; returns its base URL.
  async fn spawn_proxy() -> (Arc<crate::relay::testing::TestRelay>, String) {
    let relay = Arc::new(relay());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(serve(Arc::clone(&relay), listener));
    (relay, base)
  }

  fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
  }

  #[tokio::test]
  async fn test_listing_fallback_over_http() {
    let (relay, base) = spawn_proxy().await;
    relay
      .store()
      .put(Collection::Restaurants, "restaurants-json", &json!([{"id": 1}]))
      .unwrap();
    relay.transport().set_online(false);

    let resp = client()
      .get(format!("{}/restaurants", base))
      .send()
      .await
      .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()[SOURCE_HEADER], "store");
    let body: serde_json::Value = serde_json::from_slice(&resp.bytes().await.unwrap()).unwrap();
    assert_eq!(body, json!([{"id": 1}]));
    assert_eq!(
      relay.transport().calls(),
      vec!["GET http://localhost:1337/restaurants".to_string()]
    );
  }

  #[tokio::test]
  async fn test_offline_write_queued_over_http() {
    let (relay, base) = spawn_proxy().await;
    relay.transport().set_online(false);

    let resp = client()
      .post(format!("{}/reviews/?restaurant_id=4&name=Ann&rating=5", base))
      .send()
      .await
      .unwrap();

    assert_eq!(resp.status().as_u16(), 202);
    assert_eq!(resp.headers()[OUTCOME_HEADER], "queued");
    assert_eq!(relay.store().count(Collection::UnsentWrites).unwrap(), 1);
    let queued = relay.queued_writes().unwrap();
    assert_eq!(queued[0].host.as_deref(), Some("localhost"));
    assert_eq!(queued[0].port, Some(1337));
  }

  #[tokio::test]
  async fn test_no_data_is_gateway_timeout_over_http() {
    let (relay, base) = spawn_proxy().await;
    relay.transport().set_online(false);

    let resp = client()
      .get(format!("{}/restaurants", base))
      .send()
      .await
      .unwrap();

    assert_eq!(resp.status().as_u16(), 504);
    assert_eq!(resp.headers()[SOURCE_HEADER], "relay");
  }

  fn resolve(method: Method, target: &str) -> Url {
    let config = Config::default();
    let router = Router::new(&config);
    resolve_url(&config, &router, &method, &target.parse::<Uri>().unwrap()).unwrap()
  }

  #[test]
  fn test_absolute_form_kept() {
    assert_eq!(
      resolve(Method::Get, "http://maps.example.com/maps/api/js?key=k").as_str(),
      "http://maps.example.com/maps/api/js?key=k"
    );
  }

  #[test]
  fn test_origin_form_pages_go_to_app() {
    assert_eq!(resolve(Method::Get, "/").as_str(), "http://localhost:8000/");
    assert_eq!(
      resolve(Method::Get, "/img/1-2x.jpg").as_str(),
      "http://localhost:8000/img/1-2x.jpg"
    );
  }

  #[test]
  fn test_origin_form_api_routes_go_to_api() {
    assert_eq!(
      resolve(Method::Get, "/restaurants").as_str(),
      "http://localhost:1337/restaurants"
    );
    assert_eq!(
      resolve(Method::Post, "/reviews/?restaurant_id=2&name=A&rating=4").as_str(),
      "http://localhost:1337/reviews/?restaurant_id=2&name=A&rating=4"
    );
    assert_eq!(resolve(Method::Post, "/unsent").as_str(), "http://localhost:1337/unsent");
  }

  #[test]
  fn test_error_response_status() {
    let resp = error_response(&RelayError::NoData("/restaurants".into()));
    assert_eq!(resp.status, 504);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["error"], "No data available for /restaurants");
  }

  #[test]
  fn test_hyper_response_carries_source_and_drops_hop_by_hop() {
    let resp = Response::new(200, "ok", ResponseSource::Store)
      .with_header("content-type", "application/json")
      .with_header("transfer-encoding", "chunked");

    let out = into_hyper(resp);
    assert_eq!(out.status(), StatusCode::OK);
    assert_eq!(out.headers()[SOURCE_HEADER], "store");
    assert_eq!(out.headers()["content-type"], "application/json");
    assert!(out.headers().get("transfer-encoding").is_none());
  }
}
