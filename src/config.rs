// src/config.rs

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use crate::models::PlaceType;

// Defaults mirror the tunables the engine was sized with in production.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_POOL_SIZE: usize = 30;
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 100;
pub const DEFAULT_BREAKER_THRESHOLD: usize = 5;
pub const DEFAULT_DRAIN_GRACE_SECS: u64 = 30;

/// Fallback radius when a category has no entry in the table.
pub const DEFAULT_SEARCH_RADIUS_M: u32 = 300;

/// Category -> search radius in meters.
#[derive(Clone, Debug)]
pub struct RadiusTable {
    entries: HashMap<PlaceType, u32>,
}

impl Default for RadiusTable {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(PlaceType::HighSchool, 200);
        entries.insert(PlaceType::University, 300);
        entries.insert(PlaceType::Company, 200);
        Self { entries }
    }
}

impl RadiusTable {
    pub fn radius_m(&self, place_type: PlaceType) -> u32 {
        self.entries
            .get(&place_type)
            .copied()
            .unwrap_or(DEFAULT_SEARCH_RADIUS_M)
    }

    pub fn set(&mut self, place_type: PlaceType, radius_m: u32) {
        self.entries.insert(place_type, radius_m);
    }
}

/// Engine tunables. None of these change matching semantics, only
/// throughput, latency and peak memory.
#[derive(Clone, Debug)]
pub struct MatcherConfig {
    /// Input window size C: points held in memory per read pass.
    pub chunk_size: usize,
    /// Queries per backend round trip B.
    pub batch_size: usize,
    /// Concurrent batch executions W.
    pub pool_size: usize,
    /// Buffered results N before a durable flush.
    pub flush_threshold: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    /// Consecutive connection-level batch failures before the run aborts.
    pub breaker_threshold: usize,
    /// How long in-flight batches may drain after a fatal error.
    pub drain_grace_secs: u64,
    pub radius: RadiusTable,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY_MS,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            drain_grace_secs: DEFAULT_DRAIN_GRACE_SECS,
            radius: RadiusTable::default(),
        }
    }
}

impl MatcherConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.chunk_size = env_parse("MATCH_CHUNK_SIZE", config.chunk_size)?;
        config.batch_size = env_parse("MATCH_BATCH_SIZE", config.batch_size)?;
        config.pool_size = env_parse("MATCH_POOL_SIZE", config.pool_size)?;
        config.flush_threshold = env_parse("MATCH_FLUSH_THRESHOLD", config.flush_threshold)?;
        config.request_timeout_secs =
            env_parse("MATCH_REQUEST_TIMEOUT_SECS", config.request_timeout_secs)?;
        config.max_retries = env_parse("MATCH_MAX_RETRIES", config.max_retries)?;
        config.base_retry_delay_ms =
            env_parse("MATCH_BASE_RETRY_DELAY_MS", config.base_retry_delay_ms)?;
        config.breaker_threshold = env_parse("MATCH_BREAKER_THRESHOLD", config.breaker_threshold)?;
        config.drain_grace_secs = env_parse("MATCH_DRAIN_GRACE_SECS", config.drain_grace_secs)?;

        for place_type in [PlaceType::HighSchool, PlaceType::University, PlaceType::Company] {
            let var = format!("MATCH_RADIUS_M_{}", place_type.as_str().to_uppercase());
            let radius = env_parse(&var, config.radius.radius_m(place_type))?;
            config.radius.set(place_type, radius);
        }

        config.validate()?;
        Ok(config)
    }

    /// Zero-valued sizing tunables would stall or panic the pipeline; reject
    /// them here so a bad environment fails at startup.
    fn validate(&self) -> Result<()> {
        let positive = [
            ("MATCH_CHUNK_SIZE", self.chunk_size),
            ("MATCH_BATCH_SIZE", self.batch_size),
            ("MATCH_POOL_SIZE", self.pool_size),
            ("MATCH_FLUSH_THRESHOLD", self.flush_threshold),
        ];
        for (var, value) in positive {
            if value == 0 {
                bail!("{} must be positive", var);
            }
        }
        Ok(())
    }
}

/// Connection settings for the geo-indexed search backend.
#[derive(Clone, Debug)]
pub struct SearchBackendConfig {
    /// Base URL, e.g. `https://search-host:9200`.
    pub base_url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
}

impl SearchBackendConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("SEARCH_URL")
            .unwrap_or_else(|_| "http://localhost:9200".to_string());
        let index = std::env::var("SEARCH_INDEX").unwrap_or_else(|_| "places".to_string());
        let username = std::env::var("SEARCH_USER").ok();
        let password = std::env::var("SEARCH_PASSWORD").ok();
        let request_timeout_secs =
            env_parse("MATCH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        Ok(Self {
            base_url,
            index,
            username,
            password,
            request_timeout_secs,
        })
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", var, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_table_has_per_category_defaults() {
        let table = RadiusTable::default();
        assert_eq!(table.radius_m(PlaceType::HighSchool), 200);
        assert_eq!(table.radius_m(PlaceType::University), 300);
        assert_eq!(table.radius_m(PlaceType::Company), 200);
    }

    #[test]
    fn radius_table_overrides_stick() {
        let mut table = RadiusTable::default();
        table.set(PlaceType::Company, 500);
        assert_eq!(table.radius_m(PlaceType::Company), 500);
        assert_eq!(table.radius_m(PlaceType::HighSchool), 200);
    }

    #[test]
    fn default_config_is_internally_consistent() {
        let config = MatcherConfig::default();
        assert!(config.batch_size <= config.chunk_size);
        assert!(config.pool_size > 0);
        assert!(config.flush_threshold > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sizing_tunables_are_rejected() {
        for field in 0..4usize {
            let mut config = MatcherConfig::default();
            match field {
                0 => config.chunk_size = 0,
                1 => config.batch_size = 0,
                2 => config.pool_size = 0,
                _ => config.flush_threshold = 0,
            }
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("must be positive"), "{}", err);
        }
    }
}
