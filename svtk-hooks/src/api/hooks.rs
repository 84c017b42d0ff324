//! Hook-point endpoints called by the survey engine
//!
//! These always answer 200. A body that cannot be read is logged and answered
//! with an empty response carrying whatever transport id could be recovered,
//! or a fresh one when none could.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use svtk_common::uuid_utils::new_transport_id;
use tracing::warn;

use crate::tracker::{CompleteRequest, HookResponse, PageViewRequest, PostBackRequest};
use crate::AppState;

/// Deserialize a hook body, or build the fallback response
fn parse_hook<T: DeserializeOwned>(
    hook: &str,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<T, HookResponse> {
    let value = match body {
        Ok(Json(value)) => value,
        Err(rejection) => {
            warn!(hook, "Unreadable hook body: {}", rejection.body_text());
            return Err(empty_response(None));
        }
    };

    let transport = value
        .get("transport_session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    serde_json::from_value(value).map_err(|e| {
        warn!(hook, "Invalid hook body: {}", e);
        empty_response(transport)
    })
}

fn empty_response(transport_session_id: Option<String>) -> HookResponse {
    HookResponse {
        transport_session_id: transport_session_id.unwrap_or_else(new_transport_id),
        reset: false,
        events: Vec::new(),
    }
}

/// POST /hooks/page-view
pub async fn page_view(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<HookResponse> {
    match parse_hook::<PageViewRequest>("page-view", body) {
        Ok(req) => Json(state.tracker.page_view(req).await),
        Err(fallback) => Json(fallback),
    }
}

/// POST /hooks/post-back
pub async fn post_back(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<HookResponse> {
    match parse_hook::<PostBackRequest>("post-back", body) {
        Ok(req) => Json(state.tracker.post_back(req).await),
        Err(fallback) => Json(fallback),
    }
}

/// POST /hooks/complete
pub async fn complete(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<HookResponse> {
    match parse_hook::<CompleteRequest>("complete", body) {
        Ok(req) => Json(state.tracker.complete(req).await),
        Err(fallback) => Json(fallback),
    }
}

pub fn hook_routes() -> Router<AppState> {
    Router::new()
        .route("/hooks/page-view", post(page_view))
        .route("/hooks/post-back", post(post_back))
        .route("/hooks/complete", post(complete))
}
