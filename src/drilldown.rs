//! Rendered bucket label → the interval that bucket covers.
//!
//! When the caller says which period produced the label, the window is the
//! exact inverse of that period's grouping. Without it, granularity is
//! inferred from the label's shape: a `:00:00` marker means an hour bucket,
//! anything else a local calendar day ending at 23:59:59.999. On that path
//! month labels from the `year` view are read as day labels.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};

use crate::error::{CoreError, CoreResult};
use crate::registry::DeviceLocationRegistry;
use crate::window::{Period, TimeWindow, Truncation, WindowResolver};

// ---

const HOUR_MARKER: &str = ":00:00";

#[derive(Debug, Clone)]
pub struct RawDrilldownResolver {
    resolver: WindowResolver,
    registry: Arc<DeviceLocationRegistry>,
}

impl RawDrilldownResolver {
    // ---
    pub fn new(resolver: WindowResolver, registry: Arc<DeviceLocationRegistry>) -> Self {
        Self { resolver, registry }
    }

    pub fn resolve(
        &self,
        label: &str,
        location: &str,
        period: Option<Period>,
    ) -> CoreResult<TimeWindow> {
        // ---
        let label = label.trim();
        if label.is_empty() || location.trim().is_empty() {
            return Err(CoreError::InvalidDrilldownRequest(
                "timestamp and location are required".into(),
            ));
        }
        self.registry.require_location(location)?;

        match period {
            Some(period) => self.resolve_exact(label, period),
            None => self.resolve_by_shape(label),
        }
    }

    fn resolve_exact(&self, label: &str, period: Period) -> CoreResult<TimeWindow> {
        // ---
        let truncation = period.grouping().ok_or_else(|| {
            CoreError::InvalidDrilldownRequest("hourly readings are not bucketed".into())
        })?;
        let bucket = truncation.parse_label(label).ok_or_else(|| {
            CoreError::InvalidDrilldownRequest(format!(
                "'{}' is not a {} bucket label",
                label,
                period.keyword()
            ))
        })?;
        let next = truncation
            .next(bucket)
            .ok_or_else(|| CoreError::InvalidDrilldownRequest(format!("'{}' is out of range", label)))?;

        window(self.resolver.to_instant(bucket), self.resolver.to_instant(next), label)
    }

    fn resolve_by_shape(&self, label: &str) -> CoreResult<TimeWindow> {
        // ---
        if label.contains(HOUR_MARKER) {
            return self.resolve_hour_label(label);
        }

        let day = self.parse_day_label(label).ok_or_else(|| unparseable(label))?;
        let last_ms = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).ok_or_else(|| unparseable(label))?;
        window(
            self.resolver.to_instant(day.and_time(NaiveTime::MIN)),
            self.resolver.to_instant(day.and_time(last_ms)),
            label,
        )
    }

    /// A local hour label spans every instant grouped under it, which is
    /// two real hours when the clocks fall back.
    fn resolve_hour_label(&self, label: &str) -> CoreResult<TimeWindow> {
        // ---
        if let Ok(naive) = NaiveDateTime::parse_from_str(label, "%Y-%m-%d %H:%M:%S") {
            let bucket = Truncation::Hour.truncate(naive);
            let next = Truncation::Hour.next(bucket).ok_or_else(|| unparseable(label))?;
            return window(
                self.resolver.to_instant(bucket),
                self.resolver.to_instant(next),
                label,
            );
        }
        let start = DateTime::parse_from_rfc3339(label)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| unparseable(label))?;
        window(start, start + TimeDelta::hours(1), label)
    }

    fn parse_day_label(&self, label: &str) -> Option<NaiveDate> {
        if let Ok(day) = NaiveDate::parse_from_str(label, "%Y-%m-%d") {
            return Some(day);
        }
        self.resolver
            .parse_instant(label)
            .map(|t| self.resolver.local(t).date())
    }
}

fn unparseable(label: &str) -> CoreError {
    CoreError::InvalidDrilldownRequest(format!("unparseable bucket timestamp '{}'", label))
}

fn window(start: DateTime<Utc>, end: DateTime<Utc>, label: &str) -> CoreResult<TimeWindow> {
    TimeWindow::new(start, end).ok_or_else(|| {
        CoreError::InvalidDrilldownRequest(format!("'{}' does not describe a time range", label))
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn drilldown(tz: Tz) -> RawDrilldownResolver {
        let registry = DeviceLocationRegistry::new([("28-pool", "pool"), ("28-out", "outside")]);
        RawDrilldownResolver::new(WindowResolver::new(tz), Arc::new(registry))
    }

    #[test]
    fn test_hour_label_by_shape() {
        // ---
        let w = drilldown(Tz::UTC)
            .resolve("2025-06-15 10:00:00", "pool", None)
            .unwrap();
        assert_eq!(w.start(), utc(2025, 6, 15, 10, 0, 0));
        assert_eq!(w.end(), utc(2025, 6, 15, 11, 0, 0));
    }

    #[test]
    fn test_fall_back_hour_label_covers_both_hours() {
        // ---
        let d = drilldown(Tz::America__New_York);
        for period in [None, Some(Period::Day)] {
            let w = d.resolve("2025-11-02 01:00:00", "outside", period).unwrap();
            assert_eq!(w.start(), utc(2025, 11, 2, 5, 0, 0), "{:?}", period);
            assert_eq!(w.end(), utc(2025, 11, 2, 7, 0, 0), "{:?}", period);
        }
    }

    #[test]
    fn test_day_label_by_shape_stops_one_ms_short() {
        // ---
        let w = drilldown(Tz::UTC).resolve("2025-06-15", "pool", None).unwrap();
        assert_eq!(w.start(), utc(2025, 6, 15, 0, 0, 0));
        assert_eq!(
            w.end(),
            utc(2025, 6, 15, 23, 59, 59) + TimeDelta::milliseconds(999)
        );
        assert_eq!(w.width(), TimeDelta::days(1) - TimeDelta::milliseconds(1));
    }

    #[test]
    fn test_month_label_without_period_reads_as_day() {
        // ---
        let w = drilldown(Tz::UTC).resolve("2025-06-01", "pool", None).unwrap();
        assert_eq!(w.start(), utc(2025, 6, 1, 0, 0, 0));
        assert!(w.width() < TimeDelta::days(1));
    }

    #[test]
    fn test_exact_inverse_with_period() {
        // ---
        let d = drilldown(Tz::UTC);

        let hour = d.resolve("2025-06-15 10:00:00", "pool", Some(Period::Day)).unwrap();
        assert_eq!(hour.width(), TimeDelta::hours(1));

        let day = d.resolve("2025-06-15", "pool", Some(Period::Week)).unwrap();
        assert_eq!(day.start(), utc(2025, 6, 15, 0, 0, 0));
        assert_eq!(day.end(), utc(2025, 6, 16, 0, 0, 0));

        let month = d.resolve("2025-06-01", "pool", Some(Period::Year)).unwrap();
        assert_eq!(month.start(), utc(2025, 6, 1, 0, 0, 0));
        assert_eq!(month.end(), utc(2025, 7, 1, 0, 0, 0));
    }

    #[test]
    fn test_local_day_boundaries() {
        // ---
        let d = drilldown(Tz::America__New_York);
        let w = d.resolve("2025-06-15", "outside", Some(Period::Month)).unwrap();
        assert_eq!(w.start(), utc(2025, 6, 15, 4, 0, 0));
        assert_eq!(w.end(), utc(2025, 6, 16, 4, 0, 0));

        // Fall-back day is 25 hours long.
        let fall = d.resolve("2025-11-02", "outside", Some(Period::Week)).unwrap();
        assert_eq!(fall.width(), TimeDelta::hours(25));
    }

    #[test]
    fn test_rejections() {
        // ---
        let d = drilldown(Tz::UTC);
        assert_eq!(
            d.resolve("2025-06-15", "attic", None).unwrap_err().kind(),
            "UnknownLocation"
        );
        assert_eq!(
            d.resolve("", "pool", None).unwrap_err().kind(),
            "InvalidDrilldownRequest"
        );
        assert_eq!(
            d.resolve("2025-06-15", "", None).unwrap_err().kind(),
            "InvalidDrilldownRequest"
        );
        assert_eq!(
            d.resolve("garbage:00:00", "pool", None).unwrap_err().kind(),
            "InvalidDrilldownRequest"
        );
        assert_eq!(
            d.resolve("last tuesday", "pool", None).unwrap_err().kind(),
            "InvalidDrilldownRequest"
        );
        assert_eq!(
            d.resolve("2025-06-15 10:30:00", "pool", Some(Period::Day))
                .unwrap_err()
                .kind(),
            "InvalidDrilldownRequest"
        );
        assert_eq!(
            d.resolve("2025-06-15 10:00:00", "pool", Some(Period::Hourly))
                .unwrap_err()
                .kind(),
            "InvalidDrilldownRequest"
        );
    }
}
