//! BloodConnect request mirror.
//!
//! Keeps a durable local copy of the remote `blood_requests` collection and
//! serves it as a live, newest-first list.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod remote;
pub mod sync;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use db::MirrorStore;
use models::SyncStatus;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MirrorStore>,
    pub status: watch::Receiver<SyncStatus>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/requests", get(api::list_requests))
        .route("/requests/changes", get(api::wait_for_changes))
        .route("/requests/{id}", get(api::get_request))
        .route("/status", get(api::get_status));

    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
