use thiserror::Error;

/// The origin could not be reached at all; no response was obtained.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
  #[error("Origin unreachable: {0}")]
  Unreachable(String),

  #[error("Request timed out: {0}")]
  TimedOut(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      FetchError::TimedOut(e.to_string())
    } else if e.is_builder() {
      FetchError::InvalidRequest(e.to_string())
    } else {
      FetchError::Unreachable(e.to_string())
    }
  }
}

/// Outcomes a strategy can end in when it cannot produce a response.
#[derive(Error, Debug)]
pub enum RelayError {
  #[error(transparent)]
  Network(#[from] FetchError),

  #[error("Origin rejected the request with status {0}")]
  Rejected(u16),

  #[error("No data available for {0}")]
  NoData(String),

  #[error("Malformed queued write {key}: missing {missing}")]
  MalformedEntry { key: String, missing: &'static str },

  #[error("Store error: {0}")]
  Store(color_eyre::Report),
}

impl From<color_eyre::Report> for RelayError {
  fn from(e: color_eyre::Report) -> Self {
    RelayError::Store(e)
  }
}

impl RelayError {
  /// Status the proxy answers with when a request ends in this error.
  pub fn status(&self) -> u16 {
    match self {
      RelayError::Network(FetchError::TimedOut(_)) => 504,
      RelayError::Network(FetchError::InvalidRequest(_)) => 400,
      RelayError::Network(_) | RelayError::Rejected(_) => 502,
      RelayError::NoData(_) => 504,
      RelayError::MalformedEntry { .. } | RelayError::Store(_) => 500,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_mapping() {
    assert_eq!(RelayError::from(FetchError::Unreachable("x".into())).status(), 502);
    assert_eq!(RelayError::NoData("/restaurants".into()).status(), 504);
    assert_eq!(
      RelayError::MalformedEntry {
        key: "k".into(),
        missing: "host"
      }
      .status(),
      500
    );
  }

  #[test]
  fn test_messages() {
    let err = RelayError::NoData("reviews 3".into());
    assert_eq!(err.to_string(), "No data available for reviews 3");
  }
}
