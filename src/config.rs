use std::str::FromStr;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://maps.googleapis.com/maps/api";
const DEFAULT_DATABASE_PATH: &str = "studio-geocoder.db";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BATCH_SIZE: usize = 5;
const MAX_BATCH_SIZE: usize = 10;
const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 1_500;
const DEFAULT_INTER_BATCH_DELAY_MS: u64 = 5_000;
const DEFAULT_BASE_BACKOFF_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FAILURE_TTL_SECS: u64 = 5 * 60;
const DEFAULT_CACHE_MAX_AGE_DAYS: u32 = 7;
pub(crate) const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_path: String,
    pub geocode_api_key: Option<SecretString>,
    pub geocode_api_base: String,
    pub geocode_timeout_secs: u64,
    pub batch_size: usize,
    pub inter_request_delay_ms: u64,
    pub inter_batch_delay_ms: u64,
    pub base_backoff_ms: u64,
    pub max_retries: u32,
    pub queue_capacity: usize,
    pub cache_ttl_secs: u64,
    pub failure_ttl_secs: u64,
    pub cache_max_age_days: u32,
    pub placeholder_lat: f64,
    pub placeholder_lng: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub database_path: String,
    pub geocode_api_base: String,
    pub geocode_timeout_secs: u64,
    pub batch_size: usize,
    pub inter_request_delay_ms: u64,
    pub inter_batch_delay_ms: u64,
    pub base_backoff_ms: u64,
    pub max_retries: u32,
    pub queue_capacity: usize,
    pub cache_ttl_secs: u64,
    pub failure_ttl_secs: u64,
    pub cache_max_age_days: u32,
    pub placeholder: (f64, f64),
    pub has_geocode_api_key: bool,
}

/// Pacing knobs for the batch queue.
#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub batch_size: usize,
    pub inter_request_delay: Duration,
    pub inter_batch_delay: Duration,
    pub base_backoff: Duration,
    pub max_retries: u32,
    pub capacity: usize,
}

#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub success_ttl: Duration,
    pub failure_ttl: Duration,
    pub max_age_days: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; `from_env` feeds it the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            database_path: text("DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            geocode_api_key: text("GEOCODE_API_KEY").map(SecretString::from),
            geocode_api_base: text("GEOCODE_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            geocode_timeout_secs: parse_or(&lookup, "GEOCODE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)
                .max(1),
            batch_size: clamp_batch_size(parse_or(
                &lookup,
                "GEOCODE_BATCH_SIZE",
                DEFAULT_BATCH_SIZE,
            )),
            inter_request_delay_ms: parse_or(
                &lookup,
                "GEOCODE_INTER_REQUEST_DELAY_MS",
                DEFAULT_INTER_REQUEST_DELAY_MS,
            ),
            inter_batch_delay_ms: parse_or(
                &lookup,
                "GEOCODE_INTER_BATCH_DELAY_MS",
                DEFAULT_INTER_BATCH_DELAY_MS,
            ),
            base_backoff_ms: parse_or(&lookup, "GEOCODE_BASE_BACKOFF_MS", DEFAULT_BASE_BACKOFF_MS),
            max_retries: parse_or(&lookup, "GEOCODE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            queue_capacity: parse_or(&lookup, "GEOCODE_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)
                .max(1),
            cache_ttl_secs: parse_or(&lookup, "GEOCODE_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            failure_ttl_secs: parse_or(
                &lookup,
                "GEOCODE_FAILURE_TTL_SECS",
                DEFAULT_FAILURE_TTL_SECS,
            ),
            cache_max_age_days: parse_or(
                &lookup,
                "GEOCODE_CACHE_MAX_AGE_DAYS",
                DEFAULT_CACHE_MAX_AGE_DAYS,
            ),
            placeholder_lat: parse_coordinate(&lookup, "GEOCODE_PLACEHOLDER_LAT"),
            placeholder_lng: parse_coordinate(&lookup, "GEOCODE_PLACEHOLDER_LNG"),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            database_path: self.database_path.clone(),
            geocode_api_base: self.geocode_api_base.clone(),
            geocode_timeout_secs: self.geocode_timeout_secs,
            batch_size: self.batch_size,
            inter_request_delay_ms: self.inter_request_delay_ms,
            inter_batch_delay_ms: self.inter_batch_delay_ms,
            base_backoff_ms: self.base_backoff_ms,
            max_retries: self.max_retries,
            queue_capacity: self.queue_capacity,
            cache_ttl_secs: self.cache_ttl_secs,
            failure_ttl_secs: self.failure_ttl_secs,
            cache_max_age_days: self.cache_max_age_days,
            placeholder: self.placeholder(),
            has_geocode_api_key: self.geocode_api_key.is_some(),
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            batch_size: clamp_batch_size(self.batch_size),
            inter_request_delay: Duration::from_millis(self.inter_request_delay_ms),
            inter_batch_delay: Duration::from_millis(self.inter_batch_delay_ms),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_retries: self.max_retries,
            capacity: self.queue_capacity.max(1),
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            success_ttl: Duration::from_secs(self.cache_ttl_secs.min(MAX_CACHE_TTL_SECS)),
            failure_ttl: Duration::from_secs(self.failure_ttl_secs.min(MAX_CACHE_TTL_SECS)),
            max_age_days: self.cache_max_age_days,
        }
    }

    pub fn placeholder(&self) -> (f64, f64) {
        (self.placeholder_lat, self.placeholder_lng)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_request_delay: Duration::from_millis(DEFAULT_INTER_REQUEST_DELAY_MS),
            inter_batch_delay: Duration::from_millis(DEFAULT_INTER_BATCH_DELAY_MS),
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            success_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            failure_ttl: Duration::from_secs(DEFAULT_FAILURE_TTL_SECS),
            max_age_days: DEFAULT_CACHE_MAX_AGE_DAYS,
        }
    }
}

fn clamp_batch_size(value: usize) -> usize {
    value.clamp(1, MAX_BATCH_SIZE)
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_coordinate<F>(lookup: &F, key: &str) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        let vars: HashMap<&str, &str> = [
            ("GEOCODE_API_KEY", "secret"),
            ("DATABASE_PATH", "custom.db"),
            ("GEOCODE_BATCH_SIZE", "40"),
            ("GEOCODE_PLACEHOLDER_LAT", "40.7128"),
            ("GEOCODE_PLACEHOLDER_LNG", "NaN"),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        let public = config.public_profile();

        assert_eq!(public.database_path, "custom.db");
        assert!(public.has_geocode_api_key);
        assert!(config.geocode_api_key.is_some());
        assert_eq!(public.batch_size, MAX_BATCH_SIZE);
        assert_eq!(public.placeholder, (40.7128, 0.0));
        let rendered = serde_json::to_string(&public).unwrap();
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn defaults_apply_without_any_variables() {
        let config = AppConfig::default();
        assert!(config.geocode_api_key.is_none());
        assert_eq!(config.database_path, DEFAULT_DATABASE_PATH);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.placeholder(), (0.0, 0.0));
    }

    #[test]
    fn clamps_oversized_cache_ttls() {
        let config = AppConfig {
            cache_ttl_secs: u64::MAX,
            failure_ttl_secs: u64::MAX,
            ..AppConfig::default()
        };
        let cache = config.cache_settings();
        assert_eq!(cache.success_ttl, Duration::from_secs(MAX_CACHE_TTL_SECS));
        assert_eq!(cache.failure_ttl, Duration::from_secs(MAX_CACHE_TTL_SECS));
    }

    #[test]
    fn derives_queue_and_cache_settings() {
        let config = AppConfig {
            database_path: "test.db".into(),
            geocode_api_key: None,
            geocode_api_base: DEFAULT_API_BASE.into(),
            geocode_timeout_secs: 10,
            batch_size: 0,
            inter_request_delay_ms: 1_000,
            inter_batch_delay_ms: 3_000,
            base_backoff_ms: 30_000,
            max_retries: 3,
            queue_capacity: 0,
            cache_ttl_secs: 60,
            failure_ttl_secs: 5,
            cache_max_age_days: 7,
            placeholder_lat: 0.0,
            placeholder_lng: 0.0,
        };

        let queue = config.queue_settings();
        assert_eq!(queue.batch_size, 1);
        assert_eq!(queue.capacity, 1);
        assert_eq!(queue.base_backoff, Duration::from_secs(30));

        let cache = config.cache_settings();
        assert_eq!(cache.success_ttl, Duration::from_secs(60));
        assert_eq!(cache.failure_ttl, Duration::from_secs(5));
    }
}
