//! Application session: one mirror store plus the watcher feeding it.

use std::sync::Arc;

use tokio::sync::watch;

use super::{RemoteWatcher, RetryPolicy, WatcherHandle};
use crate::db::MirrorStore;
use crate::models::SyncStatus;
use crate::remote::RemoteCollection;

/// Explicitly constructed owner of the mirror. Components that need the
/// store get it from here instead of from ambient global state.
pub struct Session {
    store: Arc<MirrorStore>,
    watcher: WatcherHandle,
}

impl Session {
    /// Start mirroring `remote` into `store`.
    pub fn start(
        store: Arc<MirrorStore>,
        remote: Arc<dyn RemoteCollection>,
        policy: RetryPolicy,
    ) -> Self {
        let watcher = RemoteWatcher::new(remote, store.clone(), policy).start();
        Self { store, watcher }
    }

    pub fn store(&self) -> &Arc<MirrorStore> {
        &self.store
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.watcher.status()
    }

    /// Stop the watcher. The store stays readable for as long as it is shared.
    pub async fn shutdown(self) {
        self.watcher.stop().await;
        tracing::info!("Session ended");
    }
}
