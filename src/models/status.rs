//! Sync status reported by the watcher.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Subscribed, waiting for the first snapshot
    #[default]
    Connecting,
    /// Last notification was applied
    Live,
    /// Subscription or write failed; mirror is serving stale data
    Degraded,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub applied_batches: u64,
    pub records: usize,
}
