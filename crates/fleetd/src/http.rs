//! The daemon's HTTP surface: liveness and metrics exposition.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use fleetgrid_metrics::{render_prometheus, FleetReporter};

/// Build the router serving `/healthz` and `/metrics`.
pub fn build_router(reporter: FleetReporter) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(reporter)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(reporter): State<FleetReporter>) -> impl IntoResponse {
    render_prometheus(&reporter)
}
