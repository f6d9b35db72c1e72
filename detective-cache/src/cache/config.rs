//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment toggle that turns the whole cache on or off.
pub const ENV_ENABLED: &str = "AI_CACHE_ENABLED";

const ENV_MAX_MEMORY_ENTRIES: &str = "AI_CACHE_MAX_MEMORY_ENTRIES";
const ENV_MEMORY_TTL_SECONDS: &str = "AI_CACHE_MEMORY_TTL_SECONDS";
const ENV_ENABLE_DISK: &str = "AI_CACHE_ENABLE_DISK";
const ENV_MAX_DISK_ENTRIES: &str = "AI_CACHE_MAX_DISK_ENTRIES";
const ENV_DISK_TTL_SECONDS: &str = "AI_CACHE_DISK_TTL_SECONDS";
const ENV_DIRECTORY: &str = "AI_CACHE_DIRECTORY";
const ENV_CLEANUP_INTERVAL_SECONDS: &str = "AI_CACHE_CLEANUP_INTERVAL_SECONDS";
const ENV_MAX_PROMPT_LENGTH: &str = "AI_CACHE_MAX_PROMPT_LENGTH";
const ENV_HASH_ALGORITHM: &str = "AI_CACHE_HASH_ALGORITHM";
const ENV_INCLUDE_TIMESTAMP: &str = "AI_CACHE_INCLUDE_TIMESTAMP";

/// Digest used to turn a canonical request into a cache key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha224 => write!(f, "sha224"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Sha384 => write!(f, "sha384"),
            HashAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha224" => Ok(HashAlgorithm::Sha224),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(CacheError::ConfigError(format!(
                "unsupported hash algorithm: {}",
                other
            ))),
        }
    }
}

/// Configuration for an [`AiCache`](crate::cache::AiCache)
///
/// Treat a built configuration as immutable. When `enabled` is false the
/// memory capacity is forced to zero and the disk tier is switched off; see
/// [`CacheConfig::normalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries kept in the memory tier
    pub max_memory_entries: usize,

    /// Time-to-live for memory tier entries
    pub memory_ttl: Duration,

    /// Whether the persistent disk tier is used
    pub enable_disk_cache: bool,

    /// Maximum number of entries kept in the disk tier
    pub max_disk_entries: usize,

    /// Time-to-live for disk tier entries
    pub disk_ttl: Duration,

    /// Directory holding the disk tier index and blobs
    pub cache_directory: PathBuf,

    /// Pause between two background expiry sweeps
    pub cleanup_interval: Duration,

    /// Prompts longer than this (in characters) bypass the cache
    pub max_prompt_length: usize,

    /// Digest used for cache keys
    pub hash_algorithm: HashAlgorithm,

    /// Fold the current hour into every key
    pub include_timestamp_in_key: bool,

    /// Master switch
    pub enabled: bool,

    /// Random variation applied to `cleanup_interval` (0.0 - 1.0)
    pub sweep_jitter: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 1_000,
            // 1 hour
            memory_ttl: Duration::from_secs(3600),
            enable_disk_cache: false,
            max_disk_entries: 10_000,
            // 24 hours
            disk_ttl: Duration::from_secs(86_400),
            cache_directory: PathBuf::from("cache/ai_responses"),
            // 5 minutes
            cleanup_interval: Duration::from_secs(300),
            max_prompt_length: 10_000,
            hash_algorithm: HashAlgorithm::Sha256,
            include_timestamp_in_key: false,
            enabled: true,
            sweep_jitter: 0.1,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Build a configuration from `AI_CACHE_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// The cache stays disabled unless `AI_CACHE_ENABLED` is one of
    /// `true`, `1`, `yes` or `on`. Values that fail to parse keep their default.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            parse_var::<u64>(&lookup, name)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        let config = Self {
            max_memory_entries: parse_var(&lookup, ENV_MAX_MEMORY_ENTRIES)
                .unwrap_or(defaults.max_memory_entries),
            memory_ttl: secs(ENV_MEMORY_TTL_SECONDS, defaults.memory_ttl),
            enable_disk_cache: lookup(ENV_ENABLE_DISK)
                .map(|v| is_truthy(&v))
                .unwrap_or(defaults.enable_disk_cache),
            max_disk_entries: parse_var(&lookup, ENV_MAX_DISK_ENTRIES)
                .unwrap_or(defaults.max_disk_entries),
            disk_ttl: secs(ENV_DISK_TTL_SECONDS, defaults.disk_ttl),
            cache_directory: lookup(ENV_DIRECTORY)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_directory),
            cleanup_interval: secs(ENV_CLEANUP_INTERVAL_SECONDS, defaults.cleanup_interval),
            max_prompt_length: parse_var(&lookup, ENV_MAX_PROMPT_LENGTH)
                .unwrap_or(defaults.max_prompt_length),
            hash_algorithm: parse_var(&lookup, ENV_HASH_ALGORITHM)
                .unwrap_or(defaults.hash_algorithm),
            include_timestamp_in_key: lookup(ENV_INCLUDE_TIMESTAMP)
                .map(|v| is_truthy(&v))
                .unwrap_or(defaults.include_timestamp_in_key),
            enabled: lookup(ENV_ENABLED).map(|v| is_truthy(&v)).unwrap_or(false),
            sweep_jitter: defaults.sweep_jitter,
        };

        config.normalized()
    }

    /// Apply the disabled-state rules: no memory capacity, no disk tier.
    pub fn normalized(mut self) -> Self {
        if !self.enabled {
            self.max_memory_entries = 0;
            self.enable_disk_cache = false;
        }
        self
    }

    /// Copy of this configuration pointing at another cache directory
    pub fn with_cache_directory(&self, directory: impl Into<PathBuf>) -> Self {
        Self {
            cache_directory: directory.into(),
            ..self.clone()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.max_memory_entries == 0 {
            return Err(CacheError::ConfigError(
                "max_memory_entries must be greater than 0".to_string(),
            ));
        }

        if self.enable_disk_cache && self.max_disk_entries == 0 {
            return Err(CacheError::ConfigError(
                "max_disk_entries must be greater than 0".to_string(),
            ));
        }

        if self.enable_disk_cache && self.cache_directory.as_os_str().is_empty() {
            return Err(CacheError::ConfigError(
                "cache_directory must not be empty".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(CacheError::ConfigError(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.sweep_jitter) {
            return Err(CacheError::ConfigError(
                "sweep_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Sweep interval with jitter applied
    pub fn cleanup_interval_with_jitter(&self) -> Duration {
        if self.sweep_jitter <= 0.0 {
            return self.cleanup_interval;
        }

        let base_secs = self.cleanup_interval.as_secs_f64();
        let jitter_range = base_secs * self.sweep_jitter.min(1.0);
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_memory_entries: Option<usize>,
    memory_ttl: Option<Duration>,
    enable_disk_cache: Option<bool>,
    max_disk_entries: Option<usize>,
    disk_ttl: Option<Duration>,
    cache_directory: Option<PathBuf>,
    cleanup_interval: Option<Duration>,
    max_prompt_length: Option<usize>,
    hash_algorithm: Option<HashAlgorithm>,
    include_timestamp_in_key: Option<bool>,
    enabled: Option<bool>,
    sweep_jitter: Option<f64>,
}

impl CacheConfigBuilder {
    /// Set memory tier capacity
    pub fn max_memory_entries(mut self, max: usize) -> Self {
        self.max_memory_entries = Some(max);
        self
    }

    /// Set memory tier TTL
    pub fn memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    /// Enable or disable the disk tier
    pub fn enable_disk_cache(mut self, enable: bool) -> Self {
        self.enable_disk_cache = Some(enable);
        self
    }

    /// Set disk tier capacity
    pub fn max_disk_entries(mut self, max: usize) -> Self {
        self.max_disk_entries = Some(max);
        self
    }

    /// Set disk tier TTL
    pub fn disk_ttl(mut self, ttl: Duration) -> Self {
        self.disk_ttl = Some(ttl);
        self
    }

    /// Set the disk tier directory
    pub fn cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(directory.into());
        self
    }

    /// Set the background sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set the longest cacheable prompt
    pub fn max_prompt_length(mut self, length: usize) -> Self {
        self.max_prompt_length = Some(length);
        self
    }

    /// Set the key digest
    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = Some(algorithm);
        self
    }

    /// Fold an hour-granularity timestamp into keys
    pub fn include_timestamp_in_key(mut self, include: bool) -> Self {
        self.include_timestamp_in_key = Some(include);
        self
    }

    /// Turn the cache on or off
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set sweeper jitter factor (0.0 - 1.0)
    pub fn sweep_jitter(mut self, jitter: f64) -> Self {
        self.sweep_jitter = Some(jitter);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_memory_entries: self
                .max_memory_entries
                .unwrap_or(defaults.max_memory_entries),
            memory_ttl: self.memory_ttl.unwrap_or(defaults.memory_ttl),
            enable_disk_cache: self
                .enable_disk_cache
                .unwrap_or(defaults.enable_disk_cache),
            max_disk_entries: self.max_disk_entries.unwrap_or(defaults.max_disk_entries),
            disk_ttl: self.disk_ttl.unwrap_or(defaults.disk_ttl),
            cache_directory: self.cache_directory.unwrap_or(defaults.cache_directory),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            max_prompt_length: self
                .max_prompt_length
                .unwrap_or(defaults.max_prompt_length),
            hash_algorithm: self.hash_algorithm.unwrap_or(defaults.hash_algorithm),
            include_timestamp_in_key: self
                .include_timestamp_in_key
                .unwrap_or(defaults.include_timestamp_in_key),
            enabled: self.enabled.unwrap_or(defaults.enabled),
            sweep_jitter: self.sweep_jitter.unwrap_or(defaults.sweep_jitter),
        }
        .normalized()
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Memory tier only, default capacities
    pub fn memory_only() -> Self {
        Self::default()
    }

    /// Memory tier backed by a disk tier in `directory`
    pub fn persistent(directory: impl Into<PathBuf>) -> Self {
        Self {
            enable_disk_cache: true,
            cache_directory: directory.into(),
            ..Default::default()
        }
    }

    /// Cache switched off; every lookup misses
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
        .normalized()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}
