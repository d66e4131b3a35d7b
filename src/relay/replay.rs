//! Outbox replay: re-attempt every queued write, independently.

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::outbox::OutboxEntry;
use super::Relay;
use crate::error::RelayError;
use crate::net::Transport;
use crate::store::{Collection, RecordStore, StoredRecord};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReplayReport {
  pub attempted: usize,
  /// Keys acknowledged by the origin and removed from the outbox
  pub delivered: Vec<String>,
  /// Keys left queued for the next trigger
  pub retained: Vec<RetainedEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RetainedEntry {
  pub key: String,
  pub reason: String,
}

impl<S: RecordStore, T: Transport> Relay<S, T> {
  /// Drain the outbox.
  ///
  /// Every queued entry is attempted concurrently. A delivered entry is
  /// deleted; anything else leaves the entry exactly as it was. One failure
  /// never aborts or undoes the others.
  pub async fn replay_outbox(&self) -> Result<ReplayReport, RelayError> {
    let _guard = self.replay_lock.lock().await;

    let entries = self.store.get_all::<OutboxEntry>(Collection::UnsentWrites)?;
    if entries.is_empty() {
      return Ok(ReplayReport::default());
    }

    info!(count = entries.len(), "Replaying queued writes");

    let attempts = entries.into_iter().map(|record| async move {
      let outcome = self.replay_one(&record).await;
      (record.key, outcome)
    });
    let outcomes = join_all(attempts).await;

    let mut report = ReplayReport {
      attempted: outcomes.len(),
      ..Default::default()
    };
    for (key, outcome) in outcomes {
      match outcome {
        Ok(()) => report.delivered.push(key),
        Err(e) => {
          warn!(key = %key, error = %e, "Queued write not delivered");
          report.retained.push(RetainedEntry {
            key,
            reason: e.to_string(),
          });
        }
      }
    }

    info!(
      delivered = report.delivered.len(),
      retained = report.retained.len(),
      "Replay finished"
    );
    Ok(report)
  }

  async fn replay_one(&self, record: &StoredRecord<OutboxEntry>) -> Result<(), RelayError> {
    let request = record.value.to_request()?;
    let response = self.fetch(&request).await?;

    if !response.is_success() {
      return Err(RelayError::Rejected(response.status));
    }

    // The key may have been re-queued while this attempt was in flight;
    // only the version that was sent is acknowledged
    if !self
      .store
      .delete_if(Collection::UnsentWrites, &record.key, record.seq)?
    {
      debug!(key = %record.key, "Queued write replaced during replay, keeping the newer one");
    }
    Ok(())
  }
}
