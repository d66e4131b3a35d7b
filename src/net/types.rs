//! Request and response values passed between the proxy, strategies and transport.

use url::Url;

/// Header set on every response the relay produces, naming where it came from.
pub const SOURCE_HEADER: &str = "x-reviewrelay-source";

/// Header set on responses to writes that were queued instead of delivered.
pub const OUTCOME_HEADER: &str = "x-reviewrelay-outcome";

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Delete,
  Patch,
  Options,
  Other(String),
}

impl Method {
  pub fn parse(s: &str) -> Self {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Self::Get,
      "HEAD" => Self::Head,
      "POST" => Self::Post,
      "PUT" => Self::Put,
      "DELETE" => Self::Delete,
      "PATCH" => Self::Patch,
      "OPTIONS" => Self::Options,
      other => Self::Other(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
      Self::Patch => "PATCH",
      Self::Options => "OPTIONS",
      Self::Other(s) => s,
    }
  }

  /// Whether a stored response may answer this method.
  pub fn is_read(&self) -> bool {
    matches!(self, Self::Get | Self::Head)
  }
}

/// An outgoing request, as the application issued it.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  #[cfg(test)]
  pub fn post(url: Url) -> Self {
    Self::new(Method::Post, url)
  }

  /// First query parameter with the given name.
  pub fn query_param(&self, name: &str) -> Option<String> {
    self
      .url
      .query_pairs()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.into_owned())
  }
}

/// Where a response handed back to the application came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the origin
  Network,
  /// Served out of a cache region
  Region,
  /// Synthesized from the persistent record store
  Store,
  /// Produced by the relay itself (queued writes, replay reports)
  Relay,
}

impl ResponseSource {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Region => "region",
      Self::Store => "store",
      Self::Relay => "relay",
    }
  }
}

/// A response, either received from the origin or produced locally.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>, source: ResponseSource) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      source,
    }
  }

  /// A JSON response produced by the relay.
  pub fn json(status: u16, value: &serde_json::Value, source: ResponseSource) -> Self {
    Self::new(status, value.to_string(), source).with_header("content-type", "application/json")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
