//! Temperature endpoints.
//!
//! - `GET  /api/temperatures`        buckets (or raw rows for `hourly`)
//! - `GET  /api/temperatures/latest` most recent reading
//! - `GET  /api/temperatures/stats`  avg/min/max over a window
//! - `GET  /api/temperatures/raw`    readings under one rendered bucket
//! - `POST /api/temperatures`        ingest, gated by `x-ingest-secret`
//!
//! Query parsing is lenient where the dashboard relies on it (missing
//! `period` means `day`, a non-numeric `offset` means 0, an empty
//! `location` means all locations); everything else is validated by the
//! service before the store is queried.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::window::{Period, WindowRequest};
use crate::TemperatureService;

// ---

pub const INGEST_SECRET_HEADER: &str = "x-ingest-secret";

pub fn router() -> Router<Arc<TemperatureService>> {
    // ---
    Router::new()
        .route("/api/temperatures", get(buckets).post(ingest))
        .route("/api/temperatures/latest", get(latest))
        .route("/api/temperatures/stats", get(stats))
        .route("/api/temperatures/raw", get(raw))
}

/// Query parameters shared by the bucket and stats endpoints.
#[derive(Debug, Deserialize)]
struct WindowParams {
    period: Option<String>,
    offset: Option<String>,
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
    location: Option<String>,
    limit: Option<String>,
}

impl WindowParams {
    // ---
    fn period(&self) -> Period {
        self.period.as_deref().map_or(Period::Day, Period::parse)
    }

    fn location(&self) -> Option<&str> {
        non_empty(self.location.as_deref())
    }

    fn limit(&self) -> Option<usize> {
        self.limit
            .as_deref()
            .and_then(leading_int)
            .and_then(|l| usize::try_from(l).ok())
    }

    /// Explicit range when either bound is given, period/offset otherwise.
    fn window_request(&self) -> CoreResult<WindowRequest> {
        // ---
        match (
            non_empty(self.start_date.as_deref()),
            non_empty(self.end_date.as_deref()),
        ) {
            (Some(start), Some(end)) => Ok(WindowRequest::Explicit {
                start: start.to_string(),
                end: end.to_string(),
            }),
            (None, None) => Ok(WindowRequest::Offset {
                period: self.period(),
                offset: self.offset.as_deref().and_then(leading_int).unwrap_or(0),
            }),
            _ => Err(CoreError::InvalidDateFormat(
                "startDate and endDate must be given together".into(),
            )),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Leading signed integer of `raw`, ignoring whatever follows it:
/// `"-1abc"` is -1, `"1.5"` is 1, `"abc"` is `None`.
fn leading_int(raw: &str) -> Option<i64> {
    // ---
    let raw = raw.trim_start();
    let sign_len = usize::from(raw.starts_with(['+', '-']));
    let digits = raw[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len() - sign_len);
    if digits == 0 {
        return None;
    }
    raw[..sign_len + digits].parse().ok()
}

async fn buckets(
    Query(params): Query<WindowParams>,
    State(service): State<Arc<TemperatureService>>,
) -> CoreResult<impl IntoResponse> {
    // ---
    info!("GET /api/temperatures - {:?}", params);
    let request = params.window_request()?;
    let series = service
        .get_buckets(params.period(), &request, params.location(), params.limit())
        .await?;
    Ok(Json(series))
}

#[derive(Debug, Deserialize)]
struct LatestParams {
    location: Option<String>,
}

async fn latest(
    Query(params): Query<LatestParams>,
    State(service): State<Arc<TemperatureService>>,
) -> CoreResult<Json<Value>> {
    // ---
    let reading = service
        .get_latest(non_empty(params.location.as_deref()))
        .await?;
    Ok(Json(match reading {
        Some(reading) => json!(reading),
        None => json!({}),
    }))
}

async fn stats(
    Query(params): Query<WindowParams>,
    State(service): State<Arc<TemperatureService>>,
) -> CoreResult<impl IntoResponse> {
    // ---
    let request = params.window_request()?;
    let stats = service.get_stats(&request, params.location()).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct RawParams {
    timestamp: Option<String>,
    location: Option<String>,
    period: Option<String>,
}

async fn raw(
    Query(params): Query<RawParams>,
    State(service): State<Arc<TemperatureService>>,
) -> CoreResult<impl IntoResponse> {
    // ---
    let period = match non_empty(params.period.as_deref()) {
        None => None,
        Some(keyword) => Some(Period::from_keyword(keyword).ok_or_else(|| {
            CoreError::InvalidDrilldownRequest(format!("unknown period '{}'", keyword))
        })?),
    };
    let rows = service
        .get_raw_for_bucket(
            params.timestamp.as_deref().unwrap_or_default(),
            params.location.as_deref().unwrap_or_default(),
            period,
        )
        .await?;
    Ok(Json(rows))
}

/// The secret is checked before the body is even looked at; an unreadable
/// body reaches the service as `null` and is rejected there.
async fn ingest(
    State(service): State<Arc<TemperatureService>>,
    headers: HeaderMap,
    body: Bytes,
) -> CoreResult<impl IntoResponse> {
    // ---
    let secret = headers
        .get(INGEST_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let stored = service.ingest(secret, &payload).await?;
    let location = service
        .registry()
        .location_of(&stored.device_id)
        .map(str::to_string);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": stored.id,
            "temperature": stored.temperature,
            "device_id": stored.device_id,
            "location": location,
            "timestamp": stored.timestamp,
        })),
    ))
}
