//! Error types for downstream lookups

use thiserror::Error;

/// Errors that can occur while fetching one batch from a downstream service.
///
/// These never reach an aggregation caller: the soft fetch path logs them
/// and reports the batch as "no data".
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status code
    #[error("Downstream returned status {0}")]
    Status(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Body was not a JSON object of the expected value type
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Check if the failure is likely transient
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }

    /// Short label used as the metrics outcome
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Http(_) => "transport",
            Self::Status(_) => "status",
            Self::Timeout => "timeout",
            Self::Decode(_) => "decode",
            Self::InvalidUrl(_) => "invalid_url",
        }
    }
}
