//! Database schema management for `poolside-temps`.
//!
//! Ensures the readings table and its indexes exist before serving requests.
//! Applied once on startup from `main.rs` when the Postgres store is in use.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the schema (idempotent).
///
/// `temperature_readings` is append-only; every query is a range scan on
/// `recorded_at`, optionally narrowed to a set of devices, so both access
/// paths get an index. Safe to call on every startup.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS temperature_readings (
            id           BIGSERIAL        PRIMARY KEY,
            temperature  DOUBLE PRECISION NOT NULL,
            device_id    TEXT             NOT NULL,
            recorded_at  TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_temperature_readings_recorded_at
            ON temperature_readings (recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_temperature_readings_device_time
            ON temperature_readings (device_id, recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
