//! svtk-hooks library - survey session tracking service
//!
//! Receives the survey engine's hook calls (page view, post-back, completion),
//! keeps one durable row per survey session, detects abandoned sessions, and
//! fans lifecycle events out to the configured notification channels.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod assembler;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod scanner;
pub mod session;
pub mod tracker;

use tracker::Tracker;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
}

impl AppState {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker: Arc::new(tracker),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::hook_routes())
        .merge(api::admin_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
