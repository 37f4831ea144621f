//! Synthetic readings for demo datasets.
//!
//! Produces store-ready records for every registered location on a fixed
//! cadence. Entirely separate from resolution and aggregation; the only
//! shared pieces are the registry (which devices exist) and the resolver's
//! time zone (daily cycles follow local wall-clock hours).

use std::f64::consts::PI;

use anyhow::Result;
use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::aggregate::round_one_decimal;
use crate::registry::DeviceLocationRegistry;
use crate::store::{PendingReading, ReadingStore};
use crate::window::WindowResolver;

// ---

pub const DEMO_DAYS: i64 = 30;
pub const DEMO_STEP_MINUTES: i64 = 30;

/// Temperature model for one kind of location.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Model {
    /// Water: small daily swing around 80°F.
    Pool,
    /// Air: large daily swing peaking mid-afternoon plus a monthly drift.
    Ambient,
}

impl Model {
    fn for_location(location: &str) -> Self {
        if location == "pool" {
            Model::Pool
        } else {
            Model::Ambient
        }
    }

    fn sample<R: Rng>(&self, local_hour: u32, day_of_month: u32, rng: &mut R) -> f64 {
        // ---
        let hour = f64::from(local_hour);
        let value = match self {
            Model::Pool => {
                let daily = (hour / 24.0 * PI * 2.0).sin() * 3.0;
                80.0 + daily + rng.gen_range(-1.0..1.0)
            }
            Model::Ambient => {
                let daily = ((hour - 6.0) / 24.0 * PI * 2.0).sin() * 12.0;
                let seasonal = (f64::from(day_of_month) / 30.0 * PI).sin() * 8.0;
                72.0 + daily + seasonal + rng.gen_range(-2.0..2.0)
            }
        };
        round_one_decimal(value)
    }
}

/// One reading per location every `step` from `now - days` up to `now`.
pub fn generate<R: Rng>(
    registry: &DeviceLocationRegistry,
    resolver: &WindowResolver,
    now: DateTime<Utc>,
    days: i64,
    step: TimeDelta,
    rng: &mut R,
) -> Vec<PendingReading> {
    // ---
    let devices: Vec<(String, Model)> = registry
        .all_locations()
        .into_iter()
        .filter_map(|location| {
            let device = registry.device_ids_of(&location).into_iter().next()?;
            Some((device, Model::for_location(&location)))
        })
        .collect();

    let mut readings = Vec::new();
    if step <= TimeDelta::zero() {
        return readings;
    }

    let mut t = now - TimeDelta::days(days);
    while t <= now {
        let local = resolver.local(t);
        for (device_id, model) in &devices {
            readings.push(PendingReading {
                temperature: model.sample(local.hour(), local.day(), rng),
                device_id: device_id.clone(),
                timestamp: t,
            });
        }
        t += step;
    }
    readings
}

/// Fill an empty store with a month of demo readings. Leaves a store that
/// already holds data untouched.
pub async fn seed_if_empty(
    store: &dyn ReadingStore,
    registry: &DeviceLocationRegistry,
    resolver: &WindowResolver,
    now: DateTime<Utc>,
) -> Result<u64> {
    // ---
    let existing = store.count().await?;
    if existing > 0 {
        tracing::info!(existing, "store already holds readings, skipping demo seed");
        return Ok(0);
    }

    tracing::info!("Generating demo temperature data for the past {} days...", DEMO_DAYS);
    let mut rng = StdRng::from_entropy();
    let readings = generate(
        registry,
        resolver,
        now,
        DEMO_DAYS,
        TimeDelta::minutes(DEMO_STEP_MINUTES),
        &mut rng,
    );

    let written = store.insert_batch(&readings).await?;
    tracing::info!("Inserted {} demo temperature readings", written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn registry() -> DeviceLocationRegistry {
        DeviceLocationRegistry::new([("28-pool", "pool"), ("28-out", "outside")])
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_generate_covers_every_location_on_cadence() {
        // ---
        let mut rng = StdRng::seed_from_u64(7);
        let resolver = WindowResolver::new(Tz::UTC);
        let readings = generate(&registry(), &resolver, now(), 1, TimeDelta::minutes(30), &mut rng);

        // 49 half-hour marks inclusive of both ends, two locations each.
        assert_eq!(readings.len(), 98);
        assert_eq!(readings.first().map(|r| r.timestamp), Some(now() - TimeDelta::days(1)));
        assert_eq!(readings.last().map(|r| r.timestamp), Some(now()));

        for r in readings.iter().filter(|r| r.device_id == "28-pool") {
            assert!((76.0..=84.0).contains(&r.temperature), "{}", r.temperature);
            assert_eq!(r.temperature, round_one_decimal(r.temperature));
        }
        for r in readings.iter().filter(|r| r.device_id == "28-out") {
            assert!((50.0..=94.0).contains(&r.temperature), "{}", r.temperature);
        }
    }

    #[test]
    fn test_generate_is_reproducible_with_a_seed() {
        // ---
        let resolver = WindowResolver::new(Tz::UTC);
        let a = generate(&registry(), &resolver, now(), 2, TimeDelta::hours(1), &mut StdRng::seed_from_u64(1));
        let b = generate(&registry(), &resolver, now(), 2, TimeDelta::hours(1), &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
        assert!(generate(&registry(), &resolver, now(), 2, TimeDelta::zero(), &mut StdRng::seed_from_u64(1)).is_empty());
    }

    #[tokio::test]
    async fn test_seed_only_fills_empty_store() {
        // ---
        let store = MemoryStore::new();
        let resolver = WindowResolver::new(Tz::UTC);

        let written = seed_if_empty(&store, &registry(), &resolver, now()).await.unwrap();
        assert_eq!(written as i64, store.count().await.unwrap());
        assert!(written > 0);

        let again = seed_if_empty(&store, &registry(), &resolver, now()).await.unwrap();
        assert_eq!(again, 0);
    }
}
