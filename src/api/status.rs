//! Sync status endpoint.

use axum::extract::State;

use super::{success, ApiResult};
use crate::models::SyncStatus;
use crate::AppState;

/// GET /api/status - Watcher state and staleness of the mirror.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<SyncStatus> {
    let status = state.status.borrow().clone();
    success(status, state.store.revision())
}
