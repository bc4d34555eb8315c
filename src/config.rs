//! Configuration management for the Turnstile host service.
//!
//! The admission controller itself takes its policies programmatically; this
//! module only describes how the bundled binary assembles them.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::RateLimitPolicy;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
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

    /// Proxies whose forwarded-client headers are trusted.
    ///
    /// Requests arriving from any other peer are identified by the peer
    /// address, whatever headers they carry.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// How often expired counters are swept, in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// One policy per protected segment
    #[serde(default)]
    pub segments: Vec<RateLimitPolicy>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            segments: Vec::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60_000
}

impl TurnstileConfig {
    /// Load configuration from a YAML file, with `TURNSTILE__*` environment
    /// variables layered on top (e.g. `TURNSTILE__SERVER__HTTP_ADDR`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(TurnstileError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config: TurnstileConfig = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(config::Environment::with_prefix("TURNSTILE").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every segment policy and the sweep interval.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_ms == 0 {
            return Err(TurnstileError::Config(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }
        for policy in &self.rate_limiting.segments {
            policy.validate()?;
        }
        Ok(())
    }
}
