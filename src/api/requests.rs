//! Blood request endpoints.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{BloodRequest, LookupSource, MirrorSnapshot};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesParams {
    #[serde(default)]
    pub after: Option<u64>,
}

/// GET /api/requests - All mirrored requests, newest first.
pub async fn list_requests(State(state): State<AppState>) -> ApiResult<Arc<Vec<BloodRequest>>> {
    let snapshot = state.store.current();
    success(snapshot.requests, snapshot.revision)
}

/// GET /api/requests/{id} - One request from the cached snapshot or the table.
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LookupParams>,
) -> ApiResult<BloodRequest> {
    let revision = state.store.revision();

    let source = match params.source.as_deref().map(LookupSource::from_str) {
        None => LookupSource::default(),
        Some(Ok(source)) => source,
        Some(Err(e)) => return error(e, revision),
    };

    match state.store.lookup_from(&id, source).await {
        Ok(Some(request)) => success(request, revision),
        Ok(None) => error(
            AppError::NotFound(format!("Request {} not found", id)),
            revision,
        ),
        Err(e) => error(e, revision),
    }
}

/// GET /api/requests/changes?after=N - Wait for a revision other than `after`.
pub async fn wait_for_changes(
    State(state): State<AppState>,
    Query(params): Query<ChangesParams>,
) -> ApiResult<MirrorSnapshot> {
    let mut rx = state.store.observe_all();

    if let Some(after) = params.after {
        let unchanged = rx.borrow_and_update().revision == after;
        if unchanged {
            // Timing out just returns the unchanged snapshot.
            let _ = tokio::time::timeout(state.config.changes_timeout, rx.changed()).await;
        }
    }

    let snapshot = rx.borrow().clone();
    let revision = snapshot.revision;
    success(snapshot, revision)
}
