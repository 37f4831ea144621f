//! Reading store: the ordered, timestamp-indexed, append-only collaborator
//! the core queries.
//!
//! Two backends share one trait. `PgReadingStore` is the production store;
//! `MemoryStore` backs demo runs without a database and the router tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::models::Reading;
use crate::window::TimeWindow;

// ---

/// A reading waiting to be written, timestamp already decided.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReading {
    pub temperature: f64,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    // ---
    /// Readings with `window.start() <= timestamp < window.end()`, oldest
    /// first, optionally restricted to `device_ids`.
    async fn query(
        &self,
        window: &TimeWindow,
        device_ids: Option<&[String]>,
    ) -> Result<Vec<Reading>, sqlx::Error>;

    /// Most recent reading, optionally restricted to `device_ids`.
    async fn latest(&self, device_ids: Option<&[String]>) -> Result<Option<Reading>, sqlx::Error>;

    async fn insert(&self, reading: &PendingReading) -> Result<Reading, sqlx::Error>;

    /// Write all readings or none.
    async fn insert_batch(&self, readings: &[PendingReading]) -> Result<u64, sqlx::Error>;

    async fn count(&self) -> Result<i64, sqlx::Error>;
}

// ---

#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    // ---
    async fn query(
        &self,
        window: &TimeWindow,
        device_ids: Option<&[String]>,
    ) -> Result<Vec<Reading>, sqlx::Error> {
        // ---
        sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, temperature, device_id, recorded_at AS timestamp
            FROM temperature_readings
            WHERE recorded_at >= $1
              AND recorded_at <  $2
              AND ($3::text[] IS NULL OR device_id = ANY($3))
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(window.start())
        .bind(window.end())
        .bind(device_ids.map(<[String]>::to_vec))
        .fetch_all(&self.pool)
        .await
    }

    async fn latest(&self, device_ids: Option<&[String]>) -> Result<Option<Reading>, sqlx::Error> {
        // ---
        sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, temperature, device_id, recorded_at AS timestamp
            FROM temperature_readings
            WHERE ($1::text[] IS NULL OR device_id = ANY($1))
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(device_ids.map(<[String]>::to_vec))
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert(&self, reading: &PendingReading) -> Result<Reading, sqlx::Error> {
        // ---
        sqlx::query_as::<_, Reading>(
            r#"
            INSERT INTO temperature_readings (temperature, device_id, recorded_at)
            VALUES ($1, $2, $3)
            RETURNING id, temperature, device_id, recorded_at AS timestamp
            "#,
        )
        .bind(reading.temperature)
        .bind(&reading.device_id)
        .bind(reading.timestamp)
        .fetch_one(&self.pool)
        .await
    }

    async fn insert_batch(&self, readings: &[PendingReading]) -> Result<u64, sqlx::Error> {
        // ---
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for reading in readings {
            written += sqlx::query(
                r#"
                INSERT INTO temperature_readings (temperature, device_id, recorded_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(reading.temperature)
            .bind(&reading.device_id)
            .bind(reading.timestamp)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM temperature_readings")
            .fetch_one(&self.pool)
            .await
    }
}

// ---

#[derive(Debug, Default)]
struct MemoryRows {
    rows: Vec<Reading>,
    next_id: i64,
}

impl MemoryRows {
    fn push(&mut self, reading: &PendingReading) -> Reading {
        self.next_id += 1;
        let stored = Reading {
            id: self.next_id,
            temperature: reading.temperature,
            device_id: reading.device_id.clone(),
            timestamp: reading.timestamp,
        };
        self.rows.push(stored.clone());
        stored
    }
}

/// Process-local store. Readings are kept in insertion order and sorted on
/// read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryRows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn device_matches(device_ids: Option<&[String]>, device_id: &str) -> bool {
    device_ids.map_or(true, |ids| ids.iter().any(|d| d == device_id))
}

#[async_trait]
impl ReadingStore for MemoryStore {
    // ---
    async fn query(
        &self,
        window: &TimeWindow,
        device_ids: Option<&[String]>,
    ) -> Result<Vec<Reading>, sqlx::Error> {
        // ---
        let inner = self.inner.read().await;
        let mut rows: Vec<Reading> = inner
            .rows
            .iter()
            .filter(|r| window.contains(r.timestamp) && device_matches(device_ids, &r.device_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn latest(&self, device_ids: Option<&[String]>) -> Result<Option<Reading>, sqlx::Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .iter()
            .filter(|r| device_matches(device_ids, &r.device_id))
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn insert(&self, reading: &PendingReading) -> Result<Reading, sqlx::Error> {
        Ok(self.inner.write().await.push(reading))
    }

    async fn insert_batch(&self, readings: &[PendingReading]) -> Result<u64, sqlx::Error> {
        let mut inner = self.inner.write().await;
        for reading in readings {
            inner.push(reading);
        }
        Ok(readings.len() as u64)
    }

    async fn count(&self) -> Result<i64, sqlx::Error> {
        Ok(self.inner.read().await.rows.len() as i64)
    }
}
