//! Configuration management for the aggregation service
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Batch capacity, flush delay and downstream path
//! are tunable per resource type.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::batching::BatchConfig;
use crate::models::ResourceKind;

/// Default number of identifiers that triggers an immediate flush
pub const DEFAULT_BATCH_CAPACITY: usize = 5;

/// Default debounce delay before a partial batch is flushed
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 5_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Downstream services configuration
    pub downstream: DownstreamConfig,

    /// Per-resource batching configuration
    pub resources: ResourcesConfig,

    /// Inbound HTTP server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Downstream services configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base URL shared by all downstream resources
    pub base_url: String,

    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// User agent string
    pub user_agent: String,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://localhost:8080"),
            request_timeout_ms: 10_000,
            user_agent: format!("aggregator/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DownstreamConfig {
    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Batching configuration for a single resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Downstream path (e.g. `/shipments`)
    pub path: String,

    /// Pending identifiers that trigger an immediate flush
    pub batch_capacity: usize,

    /// Debounce delay in milliseconds
    pub flush_delay_ms: u64,
}

impl ResourceConfig {
    /// Default configuration for a resource type
    pub fn for_kind(kind: ResourceKind) -> Self {
        Self {
            path: kind.default_path().to_string(),
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            flush_delay_ms: DEFAULT_FLUSH_DELAY_MS,
        }
    }

    /// Get flush delay as Duration
    #[must_use]
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// Batching rules for the coalescer of this resource
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::new(self.batch_capacity, self.flush_delay())
    }
}

/// Batching configuration for all resource types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub shipments: ResourceConfig,
    pub track: ResourceConfig,
    pub pricing: ResourceConfig,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            shipments: ResourceConfig::for_kind(ResourceKind::Shipments),
            track: ResourceConfig::for_kind(ResourceKind::Track),
            pricing: ResourceConfig::for_kind(ResourceKind::Pricing),
        }
    }
}

impl ResourcesConfig {
    /// Configuration for a given resource
    pub fn get(&self, kind: ResourceKind) -> &ResourceConfig {
        match kind {
            ResourceKind::Shipments => &self.shipments,
            ResourceKind::Track => &self.track,
            ResourceKind::Pricing => &self.pricing,
        }
    }

    /// Mutable configuration for a given resource
    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut ResourceConfig {
        match kind {
            ResourceKind::Shipments => &mut self.shipments,
            ResourceKind::Track => &mut self.track,
            ResourceKind::Pricing => &mut self.pricing,
        }
    }
}

/// Inbound HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for the API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8081)),
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// `AGGREGATOR_BATCH_CAPACITY` and `AGGREGATOR_FLUSH_DELAY_MS` apply to
    /// every resource type.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("AGGREGATOR_DOWNSTREAM_URL") {
            config.downstream.base_url = url;
        }

        if let Some(timeout) = env_parse::<u64>("AGGREGATOR_REQUEST_TIMEOUT_MS") {
            config.downstream.request_timeout_ms = timeout;
        }

        let capacity = env_parse::<usize>("AGGREGATOR_BATCH_CAPACITY");
        let flush_delay_ms = env_parse::<u64>("AGGREGATOR_FLUSH_DELAY_MS");
        for kind in ResourceKind::all() {
            let resource = config.resources.get_mut(kind);
            if let Some(capacity) = capacity {
                resource.batch_capacity = capacity;
            }
            if let Some(delay) = flush_delay_ms {
                resource.flush_delay_ms = delay;
            }
        }

        if let Ok(addr) = std::env::var("AGGREGATOR_BIND_ADDRESS") {
            config.server.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid AGGREGATOR_BIND_ADDRESS: {addr}"))?;
        }

        if let Ok(level) = std::env::var("AGGREGATOR_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(format) = std::env::var("AGGREGATOR_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.downstream.base_url).with_context(|| {
            format!("Invalid downstream base_url: {}", self.downstream.base_url)
        })?;

        if self.downstream.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be greater than 0");
        }

        for kind in ResourceKind::all() {
            let resource = self.resources.get(kind);

            if resource.batch_capacity == 0 {
                anyhow::bail!("{kind}: batch_capacity must be greater than 0");
            }

            if !resource.path.starts_with('/') {
                anyhow::bail!("{kind}: path must start with '/'");
            }
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
