//! Operations exposed to the HTTP layer.
//!
//! Each operation validates everything it can (location, window, label,
//! secret, payload) before issuing at most one store call, then hands the
//! rows to the aggregation engine. Store failures surface unchanged as
//! `StorageUnavailable`; nothing is retried here.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::aggregate::AggregationEngine;
use crate::clock::Clock;
use crate::drilldown::RawDrilldownResolver;
use crate::error::{CoreError, CoreResult};
use crate::models::{BucketSeries, NewReading, RawReading, Reading, Stats};
use crate::registry::DeviceLocationRegistry;
use crate::store::{PendingReading, ReadingStore};
use crate::window::{Period, WindowRequest, WindowResolver};

// ---

/// A registered location and the devices that report for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationInfo {
    pub location: String,
    pub device_ids: Vec<String>,
}

pub struct TemperatureService {
    // ---
    store: Arc<dyn ReadingStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<DeviceLocationRegistry>,
    resolver: WindowResolver,
    engine: AggregationEngine,
    drilldown: RawDrilldownResolver,
    ingest_secret: String,
    raw_limit_default: usize,
}

impl TemperatureService {
    // ---
    pub fn new(
        store: Arc<dyn ReadingStore>,
        clock: Arc<dyn Clock>,
        registry: Arc<DeviceLocationRegistry>,
        resolver: WindowResolver,
        ingest_secret: String,
        raw_limit_default: usize,
    ) -> Self {
        Self {
            engine: AggregationEngine::new(resolver, registry.clone()),
            drilldown: RawDrilldownResolver::new(resolver, registry.clone()),
            store,
            clock,
            registry,
            resolver,
            ingest_secret,
            raw_limit_default,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    pub fn registry(&self) -> &DeviceLocationRegistry {
        &self.registry
    }

    /// Buckets (or raw rows for `hourly`) for one window.
    pub async fn get_buckets(
        &self,
        period: Period,
        request: &WindowRequest,
        location: Option<&str>,
        limit: Option<usize>,
    ) -> CoreResult<BucketSeries> {
        // ---
        let devices = self.registry.device_filter(location)?;
        let window = self.resolver.resolve(request, self.clock.now())?;
        debug!(
            period = period.keyword(),
            start = %window.start(),
            end = %window.end(),
            width_s = window.width().num_seconds(),
            location,
            "resolved bucket window"
        );

        let readings = self.store.query(&window, devices.as_deref()).await?;
        let series = self.engine.series(
            &window,
            period,
            readings,
            limit.unwrap_or(self.raw_limit_default),
        );

        info!(period = period.keyword(), rows = series.row_count(), "bucket query complete");
        Ok(series)
    }

    pub async fn get_latest(&self, location: Option<&str>) -> CoreResult<Option<RawReading>> {
        // ---
        let devices = self.registry.device_filter(location)?;
        let latest = self.store.latest(devices.as_deref()).await?;

        Ok(latest.map(|reading| {
            let location = self
                .registry
                .location_of(&reading.device_id)
                .unwrap_or(reading.device_id.as_str())
                .to_string();
            RawReading::from_reading(reading, &location)
        }))
    }

    pub async fn get_stats(
        &self,
        request: &WindowRequest,
        location: Option<&str>,
    ) -> CoreResult<Stats> {
        // ---
        let devices = self.registry.device_filter(location)?;
        let window = self.resolver.resolve(request, self.clock.now())?;
        let readings = self.store.query(&window, devices.as_deref()).await?;
        Ok(self.engine.stats(&window, &readings))
    }

    /// Raw readings underlying one previously rendered bucket.
    pub async fn get_raw_for_bucket(
        &self,
        label: &str,
        location: &str,
        period: Option<Period>,
    ) -> CoreResult<Vec<RawReading>> {
        // ---
        let window = self.drilldown.resolve(label, location, period)?;
        let devices = self.registry.require_location(location)?;
        debug!(
            label,
            location,
            start = %window.start(),
            end = %window.end(),
            "resolved drill-down window"
        );

        let readings = self.store.query(&window, Some(devices.as_slice())).await?;
        Ok(self.engine.drilldown_rows(&window, readings))
    }

    /// Store one reading after the shared secret and the payload check out.
    pub async fn ingest(&self, secret: Option<&str>, body: &Value) -> CoreResult<Reading> {
        // ---
        self.authorize_ingest(secret)?;
        let new = NewReading::from_json(body, &self.registry)?;

        let pending = PendingReading {
            temperature: new.temperature,
            timestamp: new.timestamp.unwrap_or_else(|| self.clock.now()),
            device_id: new.device_id,
        };
        let stored = self.store.insert(&pending).await?;

        info!(
            id = stored.id,
            device_id = %stored.device_id,
            temperature = stored.temperature,
            "reading ingested"
        );
        Ok(stored)
    }

    pub fn locations(&self) -> Vec<LocationInfo> {
        self.registry
            .all_locations()
            .into_iter()
            .map(|location| LocationInfo {
                device_ids: self.registry.device_ids_of(&location).into_iter().collect(),
                location,
            })
            .collect()
    }

    fn authorize_ingest(&self, secret: Option<&str>) -> CoreResult<()> {
        // ---
        let provided = secret.ok_or_else(|| CoreError::UnauthorizedIngest("missing ingest secret".into()))?;
        if bool::from(provided.as_bytes().ct_eq(self.ingest_secret.as_bytes())) {
            Ok(())
        } else {
            Err(CoreError::UnauthorizedIngest("ingest secret does not match".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use chrono_tz::Tz;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 10, 45, 0).unwrap()
    }

    fn service() -> TemperatureService {
        service_at(Tz::UTC, now())
    }

    fn service_at(tz: Tz, now: DateTime<Utc>) -> TemperatureService {
        let registry = DeviceLocationRegistry::new([("28-pool", "pool"), ("28-out", "outside")]);
        TemperatureService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedClock(now)),
            Arc::new(registry),
            WindowResolver::new(tz),
            "hunter2".to_string(),
            100,
        )
    }

    async fn ingest(svc: &TemperatureService, temperature: f64, device: &str, ts: &str) {
        svc.ingest(
            Some("hunter2"),
            &json!({"temperature": temperature, "device_id": device, "timestamp": ts}),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_day_view_buckets_by_hour() {
        // ---
        let svc = service();
        ingest(&svc, 72.34, "28-out", "2025-06-15T10:00:00Z").await;
        ingest(&svc, 72.66, "28-out", "2025-06-15T10:20:00Z").await;
        ingest(&svc, 80.00, "28-pool", "2025-06-15T10:30:00Z").await;

        let request = WindowRequest::Explicit {
            start: "2025-06-15T10:00:00Z".into(),
            end: "2025-06-15T11:00:00Z".into(),
        };
        let series = svc
            .get_buckets(Period::Day, &request, Some("outside"), None)
            .await
            .unwrap();

        let BucketSeries::Aggregated(buckets) = series else {
            panic!("day view must aggregate");
        };
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, "2025-06-15 10:00:00");
        assert_eq!(buckets[0].temperature, 72.5);
        assert_eq!(buckets[0].reading_count, 2);
    }

    #[tokio::test]
    async fn test_drilldown_matches_bucket_contents() {
        // ---
        let svc = service();
        for (t, ts) in [
            (70.0, "2025-06-14T23:59:59Z"),
            (71.0, "2025-06-15T09:00:00Z"),
            (72.0, "2025-06-15T09:59:59Z"),
            (73.0, "2025-06-15T10:00:00Z"),
        ] {
            ingest(&svc, t, "28-out", ts).await;
        }

        let request = WindowRequest::Offset {
            period: Period::Day,
            offset: -1,
        };
        let BucketSeries::Aggregated(buckets) = svc
            .get_buckets(Period::Day, &request, Some("outside"), None)
            .await
            .unwrap()
        else {
            panic!("day view must aggregate");
        };

        for bucket in &buckets {
            for period in [None, Some(Period::Day)] {
                let rows = svc
                    .get_raw_for_bucket(&bucket.timestamp, "outside", period)
                    .await
                    .unwrap();
                assert_eq!(rows.len() as i64, bucket.reading_count, "{}", bucket.timestamp);
            }
        }
        let nine = svc
            .get_raw_for_bucket("2025-06-15 09:00:00", "outside", None)
            .await
            .unwrap();
        let temps: Vec<f64> = nine.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![71.0, 72.0]);
    }

    #[tokio::test]
    async fn test_drilldown_over_fall_back_hour() {
        // ---
        // 07:00 EST, the morning the clocks went back.
        let svc = service_at(Tz::America__New_York, Utc.with_ymd_and_hms(2025, 11, 2, 12, 0, 0).unwrap());
        // 01:30 EDT and 01:30 EST share the local label 01:00.
        ingest(&svc, 60.0, "28-out", "2025-11-02T05:30:00Z").await;
        ingest(&svc, 58.0, "28-out", "2025-11-02T06:30:00Z").await;

        let request = WindowRequest::Offset {
            period: Period::Day,
            offset: -1,
        };
        let BucketSeries::Aggregated(buckets) = svc
            .get_buckets(Period::Day, &request, Some("outside"), None)
            .await
            .unwrap()
        else {
            panic!("day view must aggregate");
        };
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, "2025-11-02 01:00:00");
        assert_eq!(buckets[0].reading_count, 2);
        assert_eq!(buckets[0].temperature, 59.0);

        for period in [None, Some(Period::Day)] {
            let rows = svc
                .get_raw_for_bucket("2025-11-02 01:00:00", "outside", period)
                .await
                .unwrap();
            assert_eq!(rows.len() as i64, buckets[0].reading_count, "{:?}", period);
        }
    }

    #[tokio::test]
    async fn test_unknown_location_rejected_everywhere() {
        // ---
        let svc = service();
        let request = WindowRequest::Offset {
            period: Period::Day,
            offset: 0,
        };
        let errors = vec![
            svc.get_buckets(Period::Day, &request, Some("attic"), None)
                .await
                .unwrap_err(),
            svc.get_stats(&request, Some("attic")).await.unwrap_err(),
            svc.get_latest(Some("attic")).await.unwrap_err(),
            svc.get_raw_for_bucket("2025-06-15", "attic", None)
                .await
                .unwrap_err(),
        ];
        for err in errors {
            assert_eq!(err.kind(), "UnknownLocation");
        }
    }

    #[tokio::test]
    async fn test_ingest_requires_matching_secret() {
        // ---
        let svc = service();
        let body = json!({"temperature": 80.0, "device_id": "28-pool"});

        for secret in [None, Some("hunter3"), Some(""), Some("hunter2 ")] {
            let err = svc.ingest(secret, &body).await.unwrap_err();
            assert_eq!(err.kind(), "UnauthorizedIngest");
        }
        // Bad secret wins over bad payload.
        let err = svc.ingest(Some("nope"), &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "UnauthorizedIngest");

        assert_eq!(svc.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_defaults_timestamp_to_now() {
        // ---
        let svc = service();
        let stored = svc
            .ingest(Some("hunter2"), &json!({"temperature": 80.0, "device_id": "28-pool"}))
            .await
            .unwrap();
        assert_eq!(stored.timestamp, now());

        let latest = svc.get_latest(Some("pool")).await.unwrap().unwrap();
        assert_eq!(latest.location, "pool");
        assert_eq!(latest.temperature, 80.0);
        assert!(svc.get_latest(Some("outside")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_over_empty_window() {
        // ---
        let svc = service();
        let request = WindowRequest::Offset {
            period: Period::Week,
            offset: -10,
        };
        let stats = svc.get_stats(&request, None).await.unwrap();
        assert_eq!(stats.total_readings, 0);
        assert!(stats.avg_temp.is_none() && stats.min_temp.is_none() && stats.max_temp.is_none());
    }

    #[tokio::test]
    async fn test_invalid_range_rejected_before_query() {
        // ---
        let svc = service();
        let request = WindowRequest::Explicit {
            start: "NaN".into(),
            end: "2025-06-15".into(),
        };
        let err = svc
            .get_buckets(Period::Month, &request, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidDateFormat");
    }

    #[test]
    fn test_locations_listing() {
        // ---
        let svc = service();
        let names: Vec<String> = svc.locations().into_iter().map(|l| l.location).collect();
        assert_eq!(names, vec!["outside".to_string(), "pool".to_string()]);
    }
}
