//! Configuration types for the Choros worker pool
//!
//! Every timing and retry constant in the pool is configurable here rather
//! than hard-coded: the defaults were tuned against one managed hosting
//! environment and do not transfer to every deployment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ChorosError, Result};

/// Main configuration for a Choros deployment
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChorosConfig {
    /// Port allocation configuration
    pub ports: PortConfig,

    /// Worker lifecycle configuration
    pub lifecycle: LifecycleConfig,

    /// RPC client configuration
    pub rpc: RpcConfig,

    /// Worker service configuration
    pub worker: WorkerConfig,
}

/// A half-open candidate port range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range
    pub start: u16,
    /// One past the last port in the range
    pub end: u16,
}

impl PortRange {
    /// Create a new range
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of ports covered by the range
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    /// Whether the range covers no ports
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Port allocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Candidate ranges, tried in order
    pub ranges: Vec<PortRange>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            ranges: vec![PortRange::new(5000, 9000)],
        }
    }
}

/// Worker lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Delay between worker start issuances within one session
    #[serde(with = "humantime_serde")]
    pub stagger: Duration,

    /// Interval between readiness probe attempts
    #[serde(with = "humantime_serde")]
    pub readiness_poll_interval: Duration,

    /// Maximum readiness probe attempts before giving up
    pub readiness_max_attempts: u32,

    /// Timeout for a single readiness/health probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Grace period before a stopping worker is forcibly aborted
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Interval between port-free probes while waiting on a restart
    #[serde(with = "humantime_serde")]
    pub port_free_poll_interval: Duration,

    /// How long a restart waits for the old port to free up
    #[serde(with = "humantime_serde")]
    pub port_free_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stagger: Duration::from_secs(1),
            readiness_poll_interval: Duration::from_millis(500),
            readiness_max_attempts: 20,
            probe_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(5),
            port_free_poll_interval: Duration::from_millis(250),
            port_free_timeout: Duration::from_secs(10),
        }
    }
}

/// RPC client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Connect timeout for worker calls
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Overall timeout for a single worker call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum attempts per call
    pub max_attempts: u32,

    /// Maximum attempts for latency-sensitive calls
    pub interactive_max_attempts: u32,

    /// Initial backoff delay between retries
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Upper bound on the backoff delay
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Add jitter to backoff delays
    pub backoff_jitter: bool,

    /// Calls before a worker's continuity token is discarded
    pub context_reset_threshold: u32,

    /// Concurrent calls admitted across the whole pool
    pub admission_permits: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            interactive_max_attempts: 1,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            backoff_jitter: true,
            context_reset_threshold: 5,
            admission_permits: 1,
        }
    }
}

/// Worker service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Explicit bind host; overrides the hosting capability probe
    pub bind_host: Option<String>,

    /// Maximum exchanges retained per conversation
    pub max_log_entries: usize,

    /// Maximum concurrent conversations retained per worker
    pub max_conversations: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_host: None,
            max_log_entries: 50,
            max_conversations: 64,
        }
    }
}

impl ChorosConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (choros.toml or path from CHOROS_CONFIG_PATH)
    /// 3. Environment variable overrides (`CHOROS_` prefix, `__` separator)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Toml},
        };

        let mut figment = Figment::new()
            .merge(Toml::file("choros.toml"))
            .merge(Env::prefixed("CHOROS_").split("__"));

        if let Ok(path) = std::env::var("CHOROS_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: ChorosConfig = figment.extract().map_err(|e| {
            ChorosError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let config: ChorosConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                ChorosError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.ports.ranges.is_empty() {
            return Err(ChorosError::Configuration(
                "at least one candidate port range is required".to_string(),
            ));
        }
        if self.ports.ranges.iter().any(|r| r.is_empty()) {
            return Err(ChorosError::Configuration(
                "candidate port ranges must be non-empty".to_string(),
            ));
        }
        if self.rpc.max_attempts == 0 || self.rpc.interactive_max_attempts == 0 {
            return Err(ChorosError::Configuration(
                "rpc.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.rpc.admission_permits == 0 {
            return Err(ChorosError::Configuration(
                "rpc.admission_permits must be at least 1".to_string(),
            ));
        }
        if self.rpc.backoff_multiplier < 1.0 {
            return Err(ChorosError::Configuration(
                "rpc.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
