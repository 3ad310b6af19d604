//! aggregator - Batching API aggregation service
//!
//! Answers composite lookups over three downstream services (shipments,
//! track, pricing) while coalescing identifiers from concurrent callers
//! into few batched downstream calls.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`batching`] - Per-resource batching coalescer (capacity and debounce flushes)
//! - [`downstream`] - HTTP client for the downstream lookup services
//! - [`aggregation`] - Combines the three lookups into one response
//! - [`server`] - Inbound HTTP API
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use aggregator::aggregation::AggregationService;
//! use aggregator::config::Config;
//! use aggregator::models::AggregationRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let service = AggregationService::from_config(&config)?;
//!
//!     let request = AggregationRequest::from_csv(Some("555,666"), Some("111"), None);
//!     let aggregation = service.aggregate(&request).await;
//!     println!("{}", serde_json::to_string_pretty(&aggregation)?);
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod batching;
pub mod config;
pub mod downstream;
pub mod error;
pub mod metrics;
pub mod models;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregation::AggregationService;
    pub use crate::batching::{BatchConfig, BatchFetcher, BatchingCoalescer, PendingValue};
    pub use crate::config::Config;
    pub use crate::downstream::{DownstreamClient, FetchError, HttpBatchFetcher};
    pub use crate::error::{AggregatorErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{Aggregation, AggregationRequest, ResourceKind};
    pub use crate::server::{AggregationServer, ServerError};
}

// Direct re-exports for convenience
pub use models::{Aggregation, AggregationRequest, ResourceKind};
