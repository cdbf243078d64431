//! Read-only REST API over the mirror.
//!
//! This is the only surface a UI layer depends on: the live list, point
//! lookups, a change long-poll and the sync status.

mod requests;
mod status;

pub use requests::*;
pub use status::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{AppError, AppErrorWithRevision};

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision: u64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision: u64) -> Self {
        Self {
            success: true,
            data,
            revision,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision: u64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, revision: u64) -> ApiResult<T> {
    Err(AppErrorWithRevision {
        error: err,
        revision,
    })
}
