//! HTTP client for the downstream lookup services
//!
//! One GET is issued per flushed batch:
//!
//! ```text
//! GET {base_url}{path}?q={sorted,comma-joined identifiers}
//! ```
//!
//! A 2xx response carries a JSON object mapping identifier to value. Every
//! other outcome (transport error, timeout, non-2xx status, undecodable
//! body) is reported by the soft [`DownstreamClient::fetch`] path as an
//! empty mapping, which callers cannot tell apart from "no data for these
//! identifiers".

pub mod error;

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::batching::BatchFetcher;
use crate::config::DownstreamConfig;
use crate::metrics;
use crate::models::ResourceKind;

pub use error::FetchError;

/// Delimiter between identifiers in the `q` query value
pub const ID_DELIMITER: char = ',';

/// Encode identifiers as a single query value.
///
/// Identifiers are deduplicated, sorted lexicographically, percent-encoded
/// and joined with [`ID_DELIMITER`], so the same set always produces the same
/// string regardless of insertion order.
///
/// Downstream services split the decoded value on the delimiter, so an
/// identifier that itself contains [`ID_DELIMITER`] cannot be told apart from
/// two identifiers. [`DownstreamClient::try_fetch`] leaves such identifiers
/// out of the request.
pub fn encode_ids<I, S>(ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let sorted: BTreeSet<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();

    let mut encoded = String::new();
    for (i, id) in sorted.iter().enumerate() {
        if i > 0 {
            encoded.push(ID_DELIMITER);
        }
        encoded.extend(url::form_urlencoded::byte_serialize(id.as_bytes()));
    }
    encoded
}

/// Client for the downstream lookup services
#[derive(Debug, Clone)]
pub struct DownstreamClient {
    /// HTTP client with configured timeout
    client: Client,

    /// Base URL without trailing slash (e.g. `http://localhost:8080`)
    base_url: String,
}

impl DownstreamClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &DownstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client for a base URL with a custom timeout
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let config = DownstreamConfig {
            base_url: base_url.to_string(),
            request_timeout_ms: timeout.as_millis() as u64,
            ..DownstreamConfig::default()
        };
        Self::new(&config)
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the URL for one batch request
    pub fn batch_url<I, S>(&self, path: &str, ids: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        format!("{}{}?q={}", self.base_url, path, encode_ids(ids))
    }

    /// Fetch one batch, reporting every failure mode
    ///
    /// A JSON `null` body or a `null` value for an identifier is treated as
    /// "no data" and does not appear in the returned mapping. Identifiers
    /// containing [`ID_DELIMITER`] are never sent and resolve as missing.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Status` for non-2xx responses, `FetchError::Timeout`
    /// when the request exceeds the configured timeout, `FetchError::Decode`
    /// when the body is not a JSON object of the expected value type, and
    /// `FetchError::Http` for other transport failures.
    pub async fn try_fetch<V>(
        &self,
        path: &str,
        ids: &[String],
    ) -> Result<HashMap<String, V>, FetchError>
    where
        V: DeserializeOwned,
    {
        let (rejected, ids): (Vec<&String>, Vec<&String>) =
            ids.iter().partition(|id| id.contains(ID_DELIMITER));
        if !rejected.is_empty() {
            tracing::warn!(
                path = %path,
                identifiers = ?rejected,
                "Skipping identifiers containing the query delimiter"
            );
        }

        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = self.batch_url(path, &ids);
        tracing::debug!(url = %url, batch_size = ids.len(), "Calling downstream");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(e, &url))?;

        let values: Option<HashMap<String, Option<V>>> =
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(values
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(id, value)| value.map(|v| (id, v)))
            .collect())
    }

    /// Fetch one batch, never failing
    ///
    /// Errors are logged and reported as an empty mapping.
    pub async fn fetch<V>(&self, path: &str, ids: &[String]) -> HashMap<String, V>
    where
        V: DeserializeOwned,
    {
        let started = Instant::now();
        let result = self.try_fetch(path, ids).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(values) => {
                metrics::record_downstream_call(path, "success", elapsed);
                tracing::debug!(
                    path = %path,
                    requested = ids.len(),
                    resolved = values.len(),
                    "Downstream batch resolved"
                );
                values
            }
            Err(e) => {
                metrics::record_downstream_call(path, e.outcome(), elapsed);
                tracing::warn!(
                    path = %path,
                    batch_size = ids.len(),
                    error = %e,
                    "Downstream batch failed, resolving as missing"
                );
                HashMap::new()
            }
        }
    }
}

fn classify_transport_error(err: reqwest::Error, url: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_builder() {
        FetchError::InvalidUrl(url.to_string())
    } else {
        FetchError::Http(err)
    }
}

/// [`BatchFetcher`] backed by one downstream resource path
pub struct HttpBatchFetcher<V> {
    client: DownstreamClient,
    kind: ResourceKind,
    path: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> HttpBatchFetcher<V> {
    /// Bind a client to a resource path
    pub fn new(client: DownstreamClient, kind: ResourceKind, path: impl Into<String>) -> Self {
        Self {
            client,
            kind,
            path: path.into(),
            _value: PhantomData,
        }
    }

    /// Resource this fetcher serves
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Downstream path (e.g. `/shipments`)
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl<V> BatchFetcher<V> for HttpBatchFetcher<V>
where
    V: DeserializeOwned + Send + 'static,
{
    async fn fetch_batch(&self, ids: &[String]) -> HashMap<String, V> {
        self.client.fetch(&self.path, ids).await
    }
}
