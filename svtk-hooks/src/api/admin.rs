//! Administrative endpoints

use axum::{extract::State, routing::post, Json, Router};
use svtk_common::time::now;
use tracing::info;

use crate::error::ApiResult;
use crate::scanner::ScanReport;
use crate::AppState;

/// POST /admin/scan
///
/// Runs one pass immediately, ignoring the scan interval. Sessions claimed by
/// a concurrent pass are not reported twice.
pub async fn run_scan(State(state): State<AppState>) -> ApiResult<Json<ScanReport>> {
    info!("Manual abandonment scan requested");
    let report = state.tracker.scanner().scan_pass(now()).await?;
    Ok(Json(report))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/admin/scan", post(run_scan))
}
