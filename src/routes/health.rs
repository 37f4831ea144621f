// src/routes/health.rs
//! Liveness/readiness endpoint.
//!
//! `GET /health` answers 200 while the reading store responds and 503 once
//! it stops, so orchestrators can tell "process up" from "able to serve
//! dashboards". Follows the Explicit Module Boundary Pattern (EMBP): the
//! gateway (`mod.rs`) only sees `router()`.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::TemperatureService;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    readings: Option<i64>,
}

/// Handle `GET /health`.
async fn health(State(service): State<Arc<TemperatureService>>) -> (StatusCode, Json<HealthResponse>) {
    // ---
    match service.store().count().await {
        Ok(count) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                store: "ok",
                readings: Some(count),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check: reading store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    store: "unavailable",
                    readings: None,
                }),
            )
        }
    }
}

pub fn router() -> Router<Arc<TemperatureService>> {
    Router::new().route("/health", get(health))
}
