//! Install and activate hooks.

use futures::future::join_all;
use tracing::{info, warn};

use super::Relay;
use crate::cache::request_key;
use crate::error::{FetchError, RelayError};
use crate::net::{Request, Response, Transport};
use crate::store::RecordStore;

impl<S: RecordStore, T: Transport> Relay<S, T> {
  /// Whether the current shell region has been populated.
  pub fn shell_installed(&self) -> Result<bool, RelayError> {
    if !self.regions.exists(&self.config.regions.shell)? {
      return Ok(false);
    }
    Ok(!self.regions.open(&self.config.regions.shell)?.is_empty()?)
  }

  /// Pre-populate the shell region with the manifest.
  ///
  /// All or nothing: if any document cannot be fetched, the region is left
  /// as it was.
  pub async fn install(&self) -> Result<usize, RelayError> {
    let app = &self.config.upstream.app;
    let mut requests = Vec::with_capacity(self.config.shell.manifest.len());
    for path in &self.config.shell.manifest {
      let url = app
        .join(path)
        .map_err(|e| FetchError::InvalidRequest(format!("manifest entry {}: {}", path, e)))?;
      requests.push(Request::get(url));
    }

    let responses = join_all(requests.iter().map(|req| self.fetch(req))).await;

    let mut entries: Vec<(String, Response)> = Vec::with_capacity(requests.len());
    for (request, result) in requests.iter().zip(responses) {
      let response = result?;
      if !response.is_success() {
        warn!(url = %request.url, status = response.status, "Manifest entry unavailable");
        return Err(RelayError::Rejected(response.status));
      }
      entries.push((request_key(&request.url), response));
    }

    let region = self.regions.open(&self.config.regions.shell)?;
    region.put_all(&entries)?;

    info!(region = region.name(), documents = entries.len(), "Shell installed");
    Ok(entries.len())
  }

  /// Drop every region that is not part of this deployment.
  pub fn activate(&self) -> Result<Vec<String>, RelayError> {
    let current = self.config.current_regions();
    self.purge_regions(&current)
  }

  /// Delete regions whose name is not in `allow`. With a configured prefix,
  /// regions outside that namespace are left alone.
  pub fn purge_regions(&self, allow: &[String]) -> Result<Vec<String>, RelayError> {
    let prefix = self.config.regions.prefix.as_deref();

    let mut purged = Vec::new();
    for name in self.regions.names()? {
      let ours = prefix.map_or(true, |p| name.starts_with(p));
      if ours && !allow.contains(&name) {
        self.regions.delete(&name)?;
        info!(region = %name, "Purged stale region");
        purged.push(name);
      }
    }

    Ok(purged)
  }
}
