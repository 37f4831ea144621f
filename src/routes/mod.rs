use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::TemperatureService;

mod health;
mod locations;
mod temperatures;

// ---

pub fn router(service: Arc<TemperatureService>) -> Router {
    // ---
    Router::new()
        .merge(temperatures::router())
        .merge(locations::router())
        .merge(health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
