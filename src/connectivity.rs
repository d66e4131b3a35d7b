//! Background origin probe emitting the "connectivity restored" signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::net::{Request, Transport};
use crate::relay::Relay;
use crate::store::RecordStore;

/// Probe the API origin once and feed the result to the relay's link state.
///
/// Returns true when this probe restored connectivity.
pub async fn probe<S: RecordStore, T: Transport>(relay: &Relay<S, T>) -> bool {
  let config = relay.config();
  let url = match config.upstream.api.join(&config.connectivity.probe_path) {
    Ok(url) => url,
    Err(e) => {
      warn!(path = %config.connectivity.probe_path, error = %e, "Invalid probe path");
      return false;
    }
  };

  // Any answer at all means the origin is reachable
  let reachable = relay.transport().send(&Request::get(url)).await.is_ok();
  let restored = relay.link().report(reachable);
  debug!(reachable, link = ?relay.link().current(), "Connectivity probe");
  restored
}

/// Replay the outbox whenever a probe finds the origin reachable again.
pub async fn on_probe<S: RecordStore, T: Transport>(relay: &Relay<S, T>) {
  if !probe(relay).await {
    return;
  }

  info!("Connectivity restored");
  match relay.replay_outbox().await {
    Ok(report) if report.attempted > 0 => info!(
      delivered = report.delivered.len(),
      retained = report.retained.len(),
      "Outbox replayed after reconnect"
    ),
    Ok(_) => {}
    Err(e) => warn!(error = %e, "Outbox replay failed"),
  }
}

/// Spawn the periodic probe task.
pub fn spawn_monitor<S, T>(relay: Arc<Relay<S, T>>, interval: Duration) -> JoinHandle<()>
where
  S: RecordStore + 'static,
  T: Transport + 'static,
{
  info!(interval_secs = interval.as_secs(), "Connectivity monitor started");

  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    loop {
      ticker.tick().await;
      on_probe(&relay).await;
    }
  })
}
