//! Pipeline configuration sourced from environment variables.
//!
//! [`Config::from_env`] reads the process environment (call
//! `dotenvy::dotenv()` first to pick up a `.env` file). Everything is
//! validated up front so a bad value fails the run before any request is made.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

pub const DEFAULT_API_BASE: &str = "https://air-quality-api.open-meteo.com/v1/air-quality?latitude=17.3850&longitude=78.4867&hourly=pm10,pm2_5,carbon_monoxide,nitrogen_dioxide,ozone,sulphur_dioxide";
pub const DEFAULT_CITIES: &str = "Delhi,Bengaluru,Hyderabad,Mumbai,Kolkata";

/// Remote table every stage reads from and writes to.
pub const TABLE_NAME: &str = "air_quality_data";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Credentials for the hosted table store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: Url,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: Url,
    pub cities: Vec<String>,
    /// Total fetch attempts per city.
    pub max_retries: u32,
    pub timeout: Duration,
    pub inter_request_pause: Duration,
    pub batch_size: usize,
    /// Retries per insert batch on top of the first attempt.
    pub load_max_retries: u32,
    pub raw_dir: PathBuf,
    pub staged_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub store: Option<StoreConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_base = get("OPENAQ_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base_url = parse_url("OPENAQ_API_BASE", &api_base)?;

        let cities_raw = get("AQ_CITIES").unwrap_or_else(|| DEFAULT_CITIES.to_string());
        let cities: Vec<String> = cities_raw
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if cities.is_empty() {
            return Err(ConfigError::Invalid {
                key: "AQ_CITIES",
                value: cities_raw,
                reason: "no cities listed".to_string(),
            });
        }

        let max_retries: u32 = parse_or("MAX_RETRIES", get("MAX_RETRIES"), 3)?;
        if max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_RETRIES",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        let timeout_secs: u64 = parse_or("TIMEOUT_SECONDS", get("TIMEOUT_SECONDS"), 10)?;
        let pause_secs: f64 = parse_or("SLEEP_BETWEEN_CALLS", get("SLEEP_BETWEEN_CALLS"), 0.5)?;
        let inter_request_pause =
            Duration::try_from_secs_f64(pause_secs).map_err(|e| ConfigError::Invalid {
                key: "SLEEP_BETWEEN_CALLS",
                value: pause_secs.to_string(),
                reason: e.to_string(),
            })?;

        let batch_size: usize = parse_or("BATCH_SIZE", get("BATCH_SIZE"), 200)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "BATCH_SIZE",
                value: "0".to_string(),
                reason: "batch size must be positive".to_string(),
            });
        }
        let load_max_retries: u32 = parse_or("LOAD_MAX_RETRIES", get("LOAD_MAX_RETRIES"), 2)?;

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let dir = |key: &str, default: &str| {
            get(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let store = match (get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(StoreConfig {
                url: parse_url("SUPABASE_URL", &url)?,
                key,
            }),
            _ => None,
        };

        Ok(Self {
            api_base_url,
            cities,
            max_retries,
            timeout: Duration::from_secs(timeout_secs),
            inter_request_pause,
            batch_size,
            load_max_retries,
            raw_dir: dir("RAW_DIR", "raw"),
            staged_dir: dir("STAGED_DIR", "staged"),
            processed_dir: dir("PROCESSED_DIR", "processed"),
            store,
        })
    }

    /// Store credentials, required by the load and analyze stages.
    pub fn require_store(&self) -> Result<&StoreConfig, ConfigError> {
        self.store
            .as_ref()
            .ok_or(ConfigError::Missing("SUPABASE_URL and SUPABASE_KEY"))
    }

    pub fn staged_csv(&self) -> PathBuf {
        self.staged_dir.join("air_quality_transformed.csv")
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value: v,
        }),
    }
}
