//! Service settings, read once from the process environment.
//!
//! `main` loads `.env` before calling in here; after that every knob the
//! service has lives on [`Config`] and nothing else reads `env::var`.

use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono_tz::Tz;

use crate::registry::DeviceLocationRegistry;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

const DEFAULT_DEVICE_LOCATIONS: &str = "28-pool:pool,28-outside:outside";

/// Which reading store backs the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// PostgreSQL at the given connection string.
    Postgres { db_url: String },
    /// Process-local, lost on exit.
    Memory,
}

/// Settings snapshot taken at startup. Never reloaded.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    pub store: StoreBackend,

    /// Pool size cap. Ignored by the memory store.
    pub db_pool_max: u32,

    /// Shared secret required on every ingest request.
    pub ingest_secret: String,

    /// Physical device → logical location table.
    pub registry: DeviceLocationRegistry,

    /// Zone whose wall clock defines hours, days, months and years.
    pub local_tz: Tz,

    /// HTTP listen port.
    pub listen_port: u16,

    /// Row cap for the hourly raw view when the caller gives no `limit`.
    pub raw_limit_default: u32,

    /// Fill an empty store with a month of synthetic readings at startup.
    pub seed_demo_data: bool,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `INGEST_SECRET` – shared secret for `POST /api/temperatures`
/// - `DATABASE_URL` – PostgreSQL connection string (postgres store only)
///
/// Optional:
/// - `READING_STORE` – `postgres` (default) or `memory`
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `DEVICE_LOCATIONS` – `device:location,...` (default: one pool, one outside sensor)
/// - `LOCAL_TZ` – IANA zone name (default: `UTC`)
/// - `LISTEN_PORT` – HTTP port (default: 3000)
/// - `RAW_LIMIT_DEFAULT` – hourly view row cap (default: 100)
/// - `SEED_DEMO_DATA` – `true` to seed an empty store (default: false)
///
/// Missing required variables and unparseable values are errors, not
/// silently defaulted.
pub fn load_from_env() -> Result<Config> {
    // ---
    let store = match env::var("READING_STORE").as_deref() {
        Err(_) | Ok("postgres") => StoreBackend::Postgres {
            db_url: require_env!("DATABASE_URL"),
        },
        Ok("memory") => StoreBackend::Memory,
        Ok(other) => return Err(anyhow!("Invalid READING_STORE: {}", other)),
    };
    let ingest_secret = require_env!("INGEST_SECRET");
    if ingest_secret.is_empty() {
        return Err(anyhow!("INGEST_SECRET must not be empty"));
    }

    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let listen_port = u16::try_from(parse_env_u32!("LISTEN_PORT", 3000))
        .map_err(|e| anyhow!("Invalid LISTEN_PORT: {}", e))?;
    let raw_limit_default = parse_env_u32!("RAW_LIMIT_DEFAULT", 100);

    let registry = DeviceLocationRegistry::parse(
        &env::var("DEVICE_LOCATIONS").unwrap_or_else(|_| DEFAULT_DEVICE_LOCATIONS.to_string()),
    )?;
    let local_tz = parse_tz(&env::var("LOCAL_TZ").unwrap_or_else(|_| "UTC".to_string()))?;
    let seed_demo_data = parse_flag(env::var("SEED_DEMO_DATA").ok().as_deref());

    Ok(Config {
        store,
        db_pool_max,
        ingest_secret,
        registry,
        local_tz,
        listen_port,
        raw_limit_default,
        seed_demo_data,
    })
}

fn parse_tz(name: &str) -> Result<Tz> {
    Tz::from_str(name.trim()).map_err(|e| anyhow!("Invalid LOCAL_TZ '{}': {}", name, e))
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true") | Some("yes"))
}

/// Hide the password portion of a connection string.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}

impl Config {
    /// One info line per setting. Masks the database password and the ingest secret.
    pub fn log_config(&self) {
        // ---
        let store = match &self.store {
            StoreBackend::Postgres { db_url } => format!("postgres ({})", mask_db_url(db_url)),
            StoreBackend::Memory => "memory".to_string(),
        };
        let devices: Vec<String> = self
            .registry
            .entries()
            .map(|(device, location)| format!("{}→{}", device, location))
            .collect();

        tracing::info!("Configuration loaded:");
        tracing::info!("  READING_STORE     : {}", store);
        tracing::info!("  DB_POOL_MAX       : {}", self.db_pool_max);
        tracing::info!("  INGEST_SECRET     : ****");
        tracing::info!("  DEVICE_LOCATIONS  : {}", devices.join(", "));
        tracing::info!("  LOCAL_TZ          : {}", self.local_tz.name());
        tracing::info!("  LISTEN_PORT       : {}", self.listen_port);
        tracing::info!("  RAW_LIMIT_DEFAULT : {}", self.raw_limit_default);
        tracing::info!("  SEED_DEMO_DATA    : {}", self.seed_demo_data);
    }
}
