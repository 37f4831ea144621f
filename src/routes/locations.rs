//! `GET /api/locations`: the registered locations and their devices, for
//! the dashboard's location picker.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::service::LocationInfo;
use crate::TemperatureService;

// ---

pub fn router() -> Router<Arc<TemperatureService>> {
    Router::new().route("/api/locations", get(handler))
}

async fn handler(State(service): State<Arc<TemperatureService>>) -> Json<Vec<LocationInfo>> {
    Json(service.locations())
}
