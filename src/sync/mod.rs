//! Remote collection watcher.
//!
//! One task per session consumes notifications in order, decodes each snapshot
//! and replaces the mirror with it. Subscription failures leave the mirror
//! untouched and are retried with exponential backoff.

mod session;

pub use session::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::MirrorStore;
use crate::errors::AppError;
use crate::models::{decode_batch, Batch, RawDocument, ReplaceOutcome, SyncState, SyncStatus};
use crate::remote::RemoteCollection;

/// Delay before resubscribing after the n-th consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// `initial * 2^(attempt - 1)`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Mirrors a remote collection into a [`MirrorStore`].
pub struct RemoteWatcher {
    remote: Arc<dyn RemoteCollection>,
    store: Arc<MirrorStore>,
    policy: RetryPolicy,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl RemoteWatcher {
    pub fn new(
        remote: Arc<dyn RemoteCollection>,
        store: Arc<MirrorStore>,
        policy: RetryPolicy,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus {
            records: store.current().len(),
            ..SyncStatus::default()
        });

        Self {
            remote,
            store,
            policy,
            status: Arc::new(status),
        }
    }

    /// Spawn the watch loop. The subscription lives until the handle is
    /// stopped or dropped.
    pub fn start(self) -> WatcherHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let status_tx = self.status.clone();
        let status = status_tx.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx));

        WatcherHandle {
            shutdown,
            task: Some(task),
            status,
            status_tx,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut next_version = match self.store.batch_version().await {
            Ok(version) => version + 1,
            Err(e) => {
                tracing::warn!("Could not read batch version, starting at 1: {}", e);
                1
            }
        };
        if let Ok(Some(synced_at)) = self.store.last_synced_at().await {
            self.status
                .send_modify(|status| status.last_synced_at = Some(synced_at));
        }

        let mut failures: u32 = 0;

        loop {
            tracing::info!("Subscribing to {}", self.remote.name());
            let mut subscription = self.remote.subscribe();

            let reason = loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        self.mark_stopped();
                        return;
                    }
                    notification = subscription.next() => match notification {
                        Some(Ok(docs)) => {
                            failures = 0;
                            self.apply(&docs, &mut next_version).await;
                        }
                        Some(Err(e)) => break e,
                        None => break AppError::Remote("Subscription closed".to_string()),
                    },
                }
            };
            drop(subscription);

            failures = failures.saturating_add(1);
            let delay = self.policy.delay(failures);
            tracing::warn!(
                "Subscription to {} failed ({} in a row), retrying in {:?}: {}",
                self.remote.name(),
                failures,
                delay,
                reason
            );
            self.status.send_modify(|status| {
                status.state = SyncState::Degraded;
                status.last_error = Some(reason.to_string());
                status.consecutive_failures = failures;
            });

            tokio::select! {
                _ = shutdown.changed() => {
                    self.mark_stopped();
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn apply(&self, docs: &[RawDocument], next_version: &mut u64) {
        let requests = decode_batch(docs);
        let mut outcome = self
            .store
            .replace_all(Batch::new(*next_version, requests.clone()))
            .await;

        // Another writer got ahead of our numbering; this snapshot is still
        // the newest remote state, so renumber it once.
        if let Ok(ReplaceOutcome::Superseded { latest }) = outcome {
            tracing::warn!(
                "Batch {} superseded by {}, renumbering",
                next_version,
                latest
            );
            *next_version = latest + 1;
            outcome = self
                .store
                .replace_all(Batch::new(*next_version, requests))
                .await;
        }
        *next_version += 1;

        match outcome {
            Ok(ReplaceOutcome::Applied { records, .. }) => {
                self.status.send_modify(|status| {
                    status.state = SyncState::Live;
                    status.last_synced_at = Some(Utc::now().to_rfc3339());
                    status.last_error = None;
                    status.consecutive_failures = 0;
                    status.applied_batches += 1;
                    status.records = records;
                });
            }
            Ok(ReplaceOutcome::Superseded { latest }) => {
                tracing::warn!("Snapshot dropped, mirror already at batch {}", latest);
            }
            Err(e) => {
                tracing::error!("Failed to persist snapshot: {}", e);
                self.status.send_modify(|status| {
                    status.state = SyncState::Degraded;
                    status.last_error = Some(e.to_string());
                });
            }
        }
    }

    fn mark_stopped(&self) {
        tracing::info!("Watcher for {} stopped", self.remote.name());
        self.status
            .send_modify(|status| status.state = SyncState::Stopped);
    }
}

/// Owns a running watcher task.
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<SyncStatus>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
}

impl WatcherHandle {
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the watcher and wait for it to release the subscription. A
    /// replace already in progress completes first.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Watcher task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.status_tx
                .send_modify(|status| status.state = SyncState::Stopped);
        }
    }
}
