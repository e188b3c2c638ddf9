//! Configuration management for Floodgate.

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{KeyExtractor, KeyStrategy, LimiterConfig};

/// Prefix for environment overrides, e.g. `FLOODGATE__RATE_LIMITING__CAPACITY`.
const ENV_PREFIX: &str = "FLOODGATE";

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Burst ceiling per key
    #[serde(default = "default_capacity")]
    pub capacity: f64,

    /// Tokens restored per key per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate_per_second: f64,

    /// Idle seconds before a key's bucket is evicted
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: f64,

    /// Tokens consumed by each request
    #[serde(default = "default_cost")]
    pub cost_per_request: f64,

    /// Seconds between eviction sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: f64,

    /// How requests are mapped to buckets
    #[serde(default)]
    pub key_strategy: KeyStrategy,

    /// Header carrying the API key for key-based strategies
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Use the first `X-Forwarded-For` hop as the client address
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate_per_second: default_refill_rate(),
            key_ttl_secs: default_key_ttl(),
            cost_per_request: default_cost(),
            sweep_interval_secs: default_sweep_interval(),
            key_strategy: KeyStrategy::default(),
            api_key_header: default_api_key_header(),
            trust_forwarded_for: false,
        }
    }
}

fn default_capacity() -> f64 {
    5.0
}

fn default_refill_rate() -> f64 {
    1.0
}

fn default_key_ttl() -> f64 {
    300.0
}

fn default_cost() -> f64 {
    1.0
}

fn default_sweep_interval() -> f64 {
    30.0
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

impl RateLimitingConfig {
    /// Validated limiter settings.
    pub fn limiter_config(&self) -> Result<LimiterConfig> {
        let config = LimiterConfig::new(self.capacity, self.refill_rate_per_second)
            .with_key_ttl(positive_duration("key_ttl_secs", self.key_ttl_secs)?)
            .with_cost_per_request(self.cost_per_request);
        config.validate()?;
        Ok(config)
    }

    /// Validated interval between eviction sweeps.
    pub fn sweep_interval(&self) -> Result<Duration> {
        positive_duration("sweep_interval_secs", self.sweep_interval_secs)
    }

    /// Build the configured key extractor.
    pub fn key_extractor(&self) -> Result<Arc<dyn KeyExtractor>> {
        let header = HeaderName::try_from(self.api_key_header.as_str()).map_err(|e| {
            FloodgateError::Config(format!(
                "api_key_header {:?} is not a valid header name: {}",
                self.api_key_header, e
            ))
        })?;
        Ok(Arc::from(
            self.key_strategy.build(header, self.trust_forwarded_for),
        ))
    }
}

fn positive_duration(field: &str, secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(FloodgateError::Config(format!(
            "{} must be a positive finite number, got {}",
            field, secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| FloodgateError::Config(format!("{} is out of range: {}", field, e)))
}

impl FloodgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Environment variables use the `FLOODGATE` prefix and `__` as the
    /// nesting separator and take precedence over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading overrides from `env` instead of the
    /// process environment when it is given.
    fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Check every setting that would otherwise fail later at startup.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.limiter_config()?;
        self.rate_limiting.sweep_interval()?;
        self.rate_limiting.key_extractor()?;
        Ok(())
    }
}
