//! Data models for stored readings and the views served over them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::registry::DeviceLocationRegistry;

// ---

/// A stored sensor reading. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub id: i64,
    pub temperature: f64,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A single reading as served by the hourly and drill-down views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawReading {
    // ---
    pub temperature: f64,
    pub location: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub reading_count: i64,
}

impl RawReading {
    // ---
    pub fn from_reading(reading: Reading, location: &str) -> Self {
        Self {
            temperature: reading.temperature,
            location: location.to_string(),
            device_id: reading.device_id,
            timestamp: reading.timestamp,
            reading_count: 1,
        }
    }
}

/// One aggregated (label, location) group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    // ---
    /// Rendered bucket label, e.g. `2025-06-15 10:00:00`.
    pub timestamp: String,
    pub location: String,
    /// Average temperature, one decimal place.
    pub temperature: f64,
    pub reading_count: i64,
}

/// Result of a bucket query: raw readings for `hourly`, buckets otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BucketSeries {
    Raw(Vec<RawReading>),
    Aggregated(Vec<Bucket>),
}

impl BucketSeries {
    pub fn row_count(&self) -> usize {
        match self {
            BucketSeries::Raw(rows) => rows.len(),
            BucketSeries::Aggregated(rows) => rows.len(),
        }
    }
}

/// Whole-window statistics. Averages/extrema of an empty window are `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    // ---
    pub avg_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub total_readings: i64,
}

/// Validated ingest request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    // ---
    pub temperature: f64,
    pub device_id: String,
    /// Defaults to ingestion time when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewReading {
    // ---
    /// Validate an ingest body. The device must be registered so that every
    /// stored reading can later be resolved to a location.
    pub fn from_json(body: &Value, registry: &DeviceLocationRegistry) -> CoreResult<Self> {
        // ---
        let object = body
            .as_object()
            .ok_or_else(|| CoreError::InvalidPayload("body must be a JSON object".into()))?;

        let temperature = match object.get("temperature") {
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|t| t.is_finite())
                .ok_or_else(|| CoreError::InvalidPayload("temperature is out of range".into()))?,
            Some(_) => return Err(CoreError::InvalidPayload("temperature must be a number".into())),
            None => return Err(CoreError::InvalidPayload("temperature is required".into())),
        };

        let device_id = match object.get("device_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) => {
                return Err(CoreError::InvalidPayload("device_id must not be empty".into()))
            }
            Some(_) => return Err(CoreError::InvalidPayload("device_id must be a string".into())),
            None => return Err(CoreError::InvalidPayload("device_id is required".into())),
        };

        if registry.location_of(&device_id).is_none() {
            return Err(CoreError::InvalidPayload(format!(
                "device_id '{}' is not registered to any location",
                device_id
            )));
        }

        let timestamp = match object.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        CoreError::InvalidPayload(format!("timestamp '{}' is not RFC 3339: {}", s, e))
                    })?,
            ),
            Some(_) => return Err(CoreError::InvalidPayload("timestamp must be a string".into())),
        };

        Ok(Self {
            temperature,
            device_id,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn registry() -> DeviceLocationRegistry {
        DeviceLocationRegistry::new([("28-aaa", "pool")])
    }

    #[test]
    fn test_valid_payload() {
        // ---
        let body = json!({"temperature": 81.4, "device_id": "28-aaa", "timestamp": "2025-06-01T10:00:00Z"});
        let reading = NewReading::from_json(&body, &registry()).unwrap();
        assert_eq!(reading.temperature, 81.4);
        assert_eq!(reading.device_id, "28-aaa");
        assert_eq!(
            reading.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_zero_degrees_is_a_valid_temperature() {
        // ---
        let body = json!({"temperature": 0, "device_id": "28-aaa"});
        let reading = NewReading::from_json(&body, &registry()).unwrap();
        assert_eq!(reading.temperature, 0.0);
        assert!(reading.timestamp.is_none());
    }

    #[test]
    fn test_invalid_payloads() {
        // ---
        let reg = registry();
        for body in [
            json!([]),
            json!({"device_id": "28-aaa"}),
            json!({"temperature": "81", "device_id": "28-aaa"}),
            json!({"temperature": 81.0}),
            json!({"temperature": 81.0, "device_id": 7}),
            json!({"temperature": 81.0, "device_id": "  "}),
            json!({"temperature": 81.0, "device_id": "28-zzz"}),
            json!({"temperature": 81.0, "device_id": "28-aaa", "timestamp": "noon"}),
        ] {
            let err = NewReading::from_json(&body, &reg).unwrap_err();
            assert_eq!(err.kind(), "InvalidPayload", "{}", body);
        }
    }

    #[test]
    fn test_series_serializes_as_plain_array() {
        // ---
        let series = BucketSeries::Aggregated(vec![Bucket {
            timestamp: "2025-06-15 10:00:00".into(),
            location: "pool".into(),
            temperature: 80.1,
            reading_count: 2,
        }]);
        let value = serde_json::to_value(&series).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["reading_count"], 2);
        assert_eq!(series.row_count(), 1);
    }
}
