//! Crate-level error type
//!
//! Construction and serving report through [`Error`]. Downstream failures
//! never reach aggregation callers: the batching layer resolves them as
//! missing values, so [`FetchError`] only surfaces here when the shared
//! HTTP client cannot be built.

use thiserror::Error;

pub use crate::downstream::FetchError;
pub use crate::server::ServerError;

/// Classification shared by the crate's errors
pub trait AggregatorErrorTrait: std::error::Error {
    /// Whether retrying the same operation may succeed
    fn is_recoverable(&self) -> bool;

    /// Category used as a log field
    fn category(&self) -> ErrorCategory;
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP, timeout or bad status from a downstream
    Network,
    /// Downstream body that does not decode
    Parsing,
    /// Listener and serving failures
    Server,
    /// Invalid configuration
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Server => "server",
            Self::Config => "config",
        }
    }
}

impl AggregatorErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        FetchError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Parsing,
            Self::InvalidUrl(_) => ErrorCategory::Config,
            Self::Http(_) | Self::Status(_) | Self::Timeout => ErrorCategory::Network,
        }
    }
}

/// Errors returned by [`AggregationServer`](crate::server::AggregationServer)
/// and [`AggregationService::from_config`](crate::aggregation::AggregationService::from_config)
#[derive(Error, Debug)]
pub enum Error {
    /// Downstream client could not be created
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Configuration rejected by validation
    #[error("Config error: {0}")]
    Config(String),
}

impl AggregatorErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Server(ServerError::Serve(_)) => true,
            Self::Server(ServerError::Bind { .. }) => false,
            Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Server(_) => ErrorCategory::Server,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
