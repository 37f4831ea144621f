//! Time-window resolution.
//!
//! Turns a period keyword plus either a relative offset or an explicit
//! start/end into a half-open `[start, end)` interval of UTC instants, and
//! defines for each period how readings are grouped and how bucket labels
//! are rendered. All calendar arithmetic happens on the wall clock of the
//! configured time zone; stored and returned instants are UTC.
//!
//! Two window strategies coexist on purpose and are kept apart as named
//! variants:
//! - [`WindowStrategy::Rolling`] anchors to the reference instant's
//!   time-of-day (`day`, `week`, the unspecified fallback)
//! - [`WindowStrategy::CalendarAligned`] snaps to the start of the
//!   hour, month or year (`hourly`, `month`, `year`)

use chrono::{
    DateTime, Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};

// ---

/// Requested aggregation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Hourly,
    Day,
    Week,
    Month,
    Year,
    /// Any keyword not listed above: trailing 24 hours, grouped by hour.
    Unspecified,
}

impl Period {
    // ---
    /// Parse a period keyword. Unrecognised keywords map to
    /// [`Period::Unspecified`] rather than failing.
    pub fn parse(keyword: &str) -> Self {
        Self::from_keyword(keyword).unwrap_or(Period::Unspecified)
    }

    /// Strict lookup: only the five named periods.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "hourly" => Some(Period::Hourly),
            "day" => Some(Period::Day),
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            "year" => Some(Period::Year),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Period::Hourly => "hourly",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::Unspecified => "unspecified",
        }
    }

    pub fn strategy(&self) -> WindowStrategy {
        // ---
        match self {
            Period::Hourly => WindowStrategy::CalendarAligned(CalendarUnit::Hour),
            Period::Day => WindowStrategy::Rolling {
                span_days: 1,
                trailing: false,
            },
            Period::Week => WindowStrategy::Rolling {
                span_days: 7,
                trailing: true,
            },
            Period::Month => WindowStrategy::CalendarAligned(CalendarUnit::Month),
            Period::Year => WindowStrategy::CalendarAligned(CalendarUnit::Year),
            Period::Unspecified => WindowStrategy::Rolling {
                span_days: 1,
                trailing: true,
            },
        }
    }

    /// Grouping truncation, or `None` for the raw (non-aggregated) hourly mode.
    pub fn grouping(&self) -> Option<Truncation> {
        match self {
            Period::Hourly => None,
            Period::Day | Period::Unspecified => Some(Truncation::Hour),
            Period::Week | Period::Month => Some(Truncation::Day),
            Period::Year => Some(Truncation::Month),
        }
    }
}

/// Unit a calendar-aligned window snaps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Hour,
    Month,
    Year,
}

/// How a period's window is placed relative to the reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStrategy {
    /// `span_days` wide, anchored at the reference time-of-day. A leading
    /// window starts at the (shifted) reference; a trailing one ends there.
    Rolling { span_days: i64, trailing: bool },

    /// One calendar unit wide, starting on the unit boundary that contains
    /// the reference, shifted by whole units.
    CalendarAligned(CalendarUnit),
}

impl WindowStrategy {
    // ---
    fn resolve(&self, tz: &Tz, now: DateTime<Utc>, offset: i64) -> Option<TimeWindow> {
        // ---
        let local_now = now.with_timezone(tz).naive_local();

        match *self {
            WindowStrategy::Rolling {
                span_days,
                trailing,
            } => {
                let lead = offset.checked_mul(span_days)?;
                let start_days = if trailing {
                    lead.checked_sub(span_days)?
                } else {
                    lead
                };
                let start = shift_days(local_now, start_days)?;
                let end = shift_days(start, span_days)?;
                TimeWindow::new(to_instant(tz, start), to_instant(tz, end))
            }
            WindowStrategy::CalendarAligned(CalendarUnit::Hour) => {
                // Top of the hour is taken on the instant itself: in a DST fold
                // the wall clock alone cannot say which 01:00 `now` belongs to.
                let into_hour = TimeDelta::try_seconds(i64::from(
                    local_now.minute() * 60 + local_now.second(),
                ))? + TimeDelta::nanoseconds(i64::from(local_now.nanosecond()));
                let top = now.checked_sub_signed(into_hour)?;
                let start = top.checked_add_signed(TimeDelta::try_hours(offset)?)?;
                let end = start.checked_add_signed(TimeDelta::try_hours(1)?)?;
                TimeWindow::new(start, end)
            }
            WindowStrategy::CalendarAligned(CalendarUnit::Month) => {
                let first = Truncation::Month.truncate(local_now);
                let start = shift_months(first, offset)?;
                let end = shift_months(start, 1)?;
                TimeWindow::new(to_instant(tz, start), to_instant(tz, end))
            }
            WindowStrategy::CalendarAligned(CalendarUnit::Year) => {
                let year = i32::try_from(i64::from(local_now.year()).checked_add(offset)?).ok()?;
                let start = NaiveDate::from_ymd_opt(year, 1, 1)?.and_time(NaiveTime::MIN);
                let end = NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?.and_time(NaiveTime::MIN);
                TimeWindow::new(to_instant(tz, start), to_instant(tz, end))
            }
        }
    }
}

/// Coarsening applied to a local timestamp to find its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    Hour,
    Day,
    Month,
}

impl Truncation {
    // ---
    pub fn truncate(&self, local: NaiveDateTime) -> NaiveDateTime {
        // ---
        match self {
            Truncation::Hour => local
                .date()
                .and_time(NaiveTime::MIN)
                .with_hour(local.hour())
                .unwrap_or(local),
            Truncation::Day => local.date().and_time(NaiveTime::MIN),
            Truncation::Month => local
                .date()
                .with_day(1)
                .unwrap_or(local.date())
                .and_time(NaiveTime::MIN),
        }
    }

    /// Start of the following bucket.
    pub fn next(&self, bucket: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Truncation::Hour => bucket.checked_add_signed(TimeDelta::try_hours(1)?),
            Truncation::Day => shift_days(bucket, 1),
            Truncation::Month => shift_months(bucket, 1),
        }
    }

    pub fn label(&self, bucket: NaiveDateTime) -> String {
        match self {
            Truncation::Hour => bucket.format("%Y-%m-%d %H:00:00").to_string(),
            Truncation::Day => bucket.format("%Y-%m-%d").to_string(),
            Truncation::Month => bucket.format("%Y-%m-01").to_string(),
        }
    }

    /// Inverse of [`Truncation::label`]. Returns `None` unless `label` is
    /// exactly what this truncation would have rendered.
    pub fn parse_label(&self, label: &str) -> Option<NaiveDateTime> {
        // ---
        let label = label.trim();
        let bucket = match self {
            Truncation::Hour => NaiveDateTime::parse_from_str(label, "%Y-%m-%d %H:%M:%S").ok()?,
            Truncation::Day | Truncation::Month => NaiveDate::parse_from_str(label, "%Y-%m-%d")
                .ok()?
                .and_time(NaiveTime::MIN),
        };
        (self.truncate(bucket) == bucket && self.label(bucket) == label).then_some(bucket)
    }
}

/// Half-open interval `[start, end)` of UTC instants; `start < end` always.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    // ---
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn width(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Shape of a window request as it arrives from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowRequest {
    Offset { period: Period, offset: i64 },
    Explicit { start: String, end: String },
}

/// Resolves window requests against a fixed local time zone.
#[derive(Debug, Clone, Copy)]
pub struct WindowResolver {
    tz: Tz,
}

impl WindowResolver {
    // ---
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn resolve(&self, request: &WindowRequest, now: DateTime<Utc>) -> CoreResult<TimeWindow> {
        match request {
            WindowRequest::Offset { period, offset } => self.resolve_offset(*period, *offset, now),
            WindowRequest::Explicit { start, end } => self.resolve_explicit(start, end),
        }
    }

    /// Window for `period` shifted `offset` whole periods from `now`.
    /// The unspecified period ignores `offset`.
    pub fn resolve_offset(
        &self,
        period: Period,
        offset: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<TimeWindow> {
        // ---
        let offset = if period == Period::Unspecified { 0 } else { offset };
        period.strategy().resolve(&self.tz, now, offset).ok_or_else(|| {
            CoreError::InvalidDateFormat(format!(
                "offset {} is out of range for period '{}'",
                offset,
                period.keyword()
            ))
        })
    }

    /// Caller-supplied interval, used verbatim once both ends parse.
    pub fn resolve_explicit(&self, start: &str, end: &str) -> CoreResult<TimeWindow> {
        // ---
        let parsed_start = self
            .parse_instant(start)
            .ok_or_else(|| CoreError::InvalidDateFormat(format!("unparseable startDate '{}'", start)))?;
        let parsed_end = self
            .parse_instant(end)
            .ok_or_else(|| CoreError::InvalidDateFormat(format!("unparseable endDate '{}'", end)))?;

        TimeWindow::new(parsed_start, parsed_end).ok_or_else(|| {
            CoreError::InvalidDateFormat(format!(
                "startDate '{}' must be before endDate '{}'",
                start, end
            ))
        })
    }

    /// Accepts RFC 3339, or naive `YYYY-MM-DD[ T]HH:MM[:SS[.fff]]` /
    /// `YYYY-MM-DD` read as local wall-clock time.
    pub fn parse_instant(&self, raw: &str) -> Option<DateTime<Utc>> {
        // ---
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in [
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%d %H:%M",
            "%Y-%m-%dT%H:%M",
        ] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(self.to_instant(naive));
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(|d| self.to_instant(d.and_time(NaiveTime::MIN)))
    }

    pub fn local(&self, t: DateTime<Utc>) -> NaiveDateTime {
        t.with_timezone(&self.tz).naive_local()
    }

    pub fn to_instant(&self, local: NaiveDateTime) -> DateTime<Utc> {
        to_instant(&self.tz, local)
    }

    /// Bucket start (local) and rendered label for `t` under `truncation`.
    pub fn bucket_of(&self, truncation: Truncation, t: DateTime<Utc>) -> (NaiveDateTime, String) {
        let bucket = truncation.truncate(self.local(t));
        (bucket, truncation.label(bucket))
    }
}

// ---

/// Map a local wall-clock time to a UTC instant. Ambiguous times (DST
/// fold) take the earlier instant; non-existent times (DST gap) are read
/// with the offset in force before the transition, which lands them past
/// the gap by its length.
fn to_instant(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    // ---
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return dt.with_timezone(&Utc);
    }
    let before = local
        .checked_sub_signed(TimeDelta::days(1))
        .unwrap_or(local);
    let fixed = tz.offset_from_utc_datetime(&before).fix();
    fixed
        .from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

fn shift_days(local: NaiveDateTime, days: i64) -> Option<NaiveDateTime> {
    local.checked_add_signed(TimeDelta::try_days(days)?)
}

fn shift_months(local: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        local.checked_add_months(magnitude)
    } else {
        local.checked_sub_months(magnitude)
    }
}
