//! Reduction of readings into buckets, raw rows and whole-window stats.
//!
//! The engine never talks to the store: callers hand it the readings the
//! store returned for a resolved window, which keeps every reduction a pure
//! function of (window, period, readings).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::models::{Bucket, BucketSeries, RawReading, Reading, Stats};
use crate::registry::DeviceLocationRegistry;
use crate::window::{Period, TimeWindow, Truncation, WindowResolver};

// ---

#[derive(Debug, Clone)]
pub struct AggregationEngine {
    resolver: WindowResolver,
    registry: Arc<DeviceLocationRegistry>,
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: i64,
}

impl AggregationEngine {
    // ---
    pub fn new(resolver: WindowResolver, registry: Arc<DeviceLocationRegistry>) -> Self {
        Self { resolver, registry }
    }

    /// Raw rows for `hourly`, buckets for every other period.
    pub fn series(
        &self,
        window: &TimeWindow,
        period: Period,
        readings: Vec<Reading>,
        raw_limit: usize,
    ) -> BucketSeries {
        match period.grouping() {
            None => BucketSeries::Raw(self.raw_readings(window, readings, raw_limit)),
            Some(truncation) => BucketSeries::Aggregated(self.aggregate(window, truncation, &readings)),
        }
    }

    /// Group readings in `window` by (truncated local timestamp, location).
    /// Buckets come back ascending by label then location; empty buckets
    /// are never produced.
    pub fn aggregate(
        &self,
        window: &TimeWindow,
        truncation: Truncation,
        readings: &[Reading],
    ) -> Vec<Bucket> {
        // ---
        let mut groups: BTreeMap<(NaiveDateTime, String), Accumulator> = BTreeMap::new();
        self.warn_unregistered(readings);

        for reading in readings.iter().filter(|r| window.contains(r.timestamp)) {
            let (bucket, _) = self.resolver.bucket_of(truncation, reading.timestamp);
            let location = self.location_label(&reading.device_id);
            let acc = groups.entry((bucket, location)).or_default();
            acc.sum += reading.temperature;
            acc.count += 1;
        }

        groups
            .into_iter()
            .map(|((bucket, location), acc)| Bucket {
                timestamp: truncation.label(bucket),
                location,
                temperature: round_one_decimal(acc.sum / acc.count as f64),
                reading_count: acc.count,
            })
            .collect()
    }

    /// Individual readings in `window`, newest first, at most `limit`.
    pub fn raw_readings(
        &self,
        window: &TimeWindow,
        readings: Vec<Reading>,
        limit: usize,
    ) -> Vec<RawReading> {
        // ---
        let mut rows: Vec<Reading> = readings
            .into_iter()
            .filter(|r| window.contains(r.timestamp))
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        self.warn_unregistered(&rows);

        rows.into_iter()
            .map(|r| {
                let location = self.location_label(&r.device_id);
                RawReading::from_reading(r, &location)
            })
            .collect()
    }

    /// Readings in `window`, oldest first.
    pub fn drilldown_rows(&self, window: &TimeWindow, readings: Vec<Reading>) -> Vec<RawReading> {
        // ---
        let mut rows: Vec<Reading> = readings
            .into_iter()
            .filter(|r| window.contains(r.timestamp))
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        self.warn_unregistered(&rows);

        rows.into_iter()
            .map(|r| {
                let location = self.location_label(&r.device_id);
                RawReading::from_reading(r, &location)
            })
            .collect()
    }

    /// Average, minimum and maximum over the whole window.
    pub fn stats(&self, window: &TimeWindow, readings: &[Reading]) -> Stats {
        // ---
        let mut total = 0i64;
        let mut sum = 0.0;
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;

        for t in readings
            .iter()
            .filter(|r| window.contains(r.timestamp))
            .map(|r| r.temperature)
        {
            total += 1;
            sum += t;
            min = Some(min.map_or(t, |m| m.min(t)));
            max = Some(max.map_or(t, |m| m.max(t)));
        }

        Stats {
            avg_temp: (total > 0).then(|| sum / total as f64),
            min_temp: min,
            max_temp: max,
            total_readings: total,
        }
    }

    /// Readings from devices the registry does not know keep their raw
    /// device id as location.
    fn location_label(&self, device_id: &str) -> String {
        self.registry
            .location_of(device_id)
            .unwrap_or(device_id)
            .to_string()
    }

    /// Distinct device ids in `readings` with no registered location.
    pub fn unregistered_devices<'a>(&self, readings: &'a [Reading]) -> BTreeSet<&'a str> {
        readings
            .iter()
            .map(|r| r.device_id.as_str())
            .filter(|d| self.registry.location_of(d).is_none())
            .collect()
    }

    fn warn_unregistered(&self, readings: &[Reading]) {
        // ---
        for device_id in self.unregistered_devices(readings) {
            let readings = readings.iter().filter(|r| r.device_id == device_id).count();
            tracing::warn!(device_id, readings, "readings from unregistered device, grouped under its id");
        }
    }
}

/// Round to one decimal place, halves away from zero.
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
