//! Aggregation of the three resource lookups into one response
//!
//! Each inbound aggregation hands its identifier sets to the per-resource
//! coalescers and waits for every resulting future. Identifiers requested by
//! concurrent aggregations share downstream calls through the coalescers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;

use crate::batching::{BatchingCoalescer, PendingValue};
use crate::config::Config;
use crate::downstream::{DownstreamClient, HttpBatchFetcher};
use crate::error::Result;
use crate::metrics;
use crate::models::{Aggregation, AggregationRequest, Price, ResourceKind, ShipmentContents, TrackStatus};

/// Combines shipments, track and pricing lookups for aggregation requests.
///
/// Cheap to clone; clones share the coalescers.
#[derive(Clone)]
pub struct AggregationService {
    shipments: BatchingCoalescer<ShipmentContents>,
    track: BatchingCoalescer<TrackStatus>,
    pricing: BatchingCoalescer<Price>,
}

impl AggregationService {
    /// Create a service from one coalescer per resource
    pub fn new(
        shipments: BatchingCoalescer<ShipmentContents>,
        track: BatchingCoalescer<TrackStatus>,
        pricing: BatchingCoalescer<Price>,
    ) -> Self {
        Self {
            shipments,
            track,
            pricing,
        }
    }

    /// Build HTTP-backed coalescers sharing one downstream client
    ///
    /// # Errors
    ///
    /// Returns `Error::Fetch` if the HTTP client cannot be created
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = DownstreamClient::new(&config.downstream)?;

        Ok(Self::new(
            http_coalescer(&client, config, ResourceKind::Shipments),
            http_coalescer(&client, config, ResourceKind::Track),
            http_coalescer(&client, config, ResourceKind::Pricing),
        ))
    }

    /// Resolve every identifier in the request.
    ///
    /// The result contains every requested identifier; those that could not
    /// be resolved map to `None`. Never fails: downstream errors only show
    /// up as missing values.
    pub async fn aggregate(&self, request: &AggregationRequest) -> Aggregation {
        let _timer = metrics::start_aggregation_timer();

        let shipments = self.shipments.request(request.shipments.iter().cloned()).await;
        let track = self.track.request(request.track.iter().cloned()).await;
        let pricing = self.pricing.request(request.pricing.iter().cloned()).await;

        let (shipments, track, pricing) = tokio::join!(
            collect(&request.shipments, shipments),
            collect(&request.track, track),
            collect(&request.pricing, pricing),
        );

        let aggregation = Aggregation {
            shipments,
            track,
            pricing,
        };

        tracing::debug!(
            identifiers = request.len(),
            missing = aggregation.missing_count(),
            "Aggregation complete"
        );

        aggregation
    }

    /// Flush all three coalescers and wait for pending lookups to resolve
    pub async fn flush_all(&self) {
        tokio::join!(
            self.shipments.flush(),
            self.track.flush(),
            self.pricing.flush(),
        );
    }
}

fn http_coalescer<V>(client: &DownstreamClient, config: &Config, kind: ResourceKind) -> BatchingCoalescer<V>
where
    V: serde::de::DeserializeOwned + Clone + Send + 'static,
{
    let resource = config.resources.get(kind);
    let fetcher = HttpBatchFetcher::<V>::new(client.clone(), kind, resource.path.clone());

    BatchingCoalescer::new(kind, resource.batch_config(), Arc::new(fetcher))
}

/// Await every future and key the results by identifier
async fn collect<V>(
    ids: &BTreeSet<String>,
    mut pending: HashMap<String, PendingValue<V>>,
) -> BTreeMap<String, Option<V>> {
    let (ids, futures): (Vec<String>, Vec<PendingValue<V>>) = ids
        .iter()
        .filter_map(|id| pending.remove(id).map(|future| (id.clone(), future)))
        .unzip();

    ids.into_iter().zip(join_all(futures).await).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::{BatchConfig, BatchFetcher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(5);

    /// Fixed downstream data, optionally failing every call
    struct StaticFetcher<V> {
        data: HashMap<String, V>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl<V: Clone> StaticFetcher<V> {
        fn new(data: &[(&str, V)]) -> Arc<Self> {
            Arc::new(Self {
                data: data.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                data: HashMap::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl<V: Clone + Send + Sync> BatchFetcher<V> for StaticFetcher<V> {
        async fn fetch_batch(&self, ids: &[String]) -> HashMap<String, V> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return HashMap::new();
            }
            ids.iter()
                .filter_map(|id| self.data.get(id).map(|v| (id.clone(), v.clone())))
                .collect()
        }
    }

    fn shipments_fetcher() -> Arc<StaticFetcher<ShipmentContents>> {
        StaticFetcher::new(&[
            ("555", vec!["box".to_string()]),
            ("666", vec!["envelope".to_string()]),
        ])
    }

    fn track_fetcher() -> Arc<StaticFetcher<TrackStatus>> {
        StaticFetcher::new(&[("111", "NEW".to_string()), ("222", "COLLECTING".to_string())])
    }

    fn pricing_fetcher() -> Arc<StaticFetcher<Price>> {
        StaticFetcher::new(&[("NL", 2222.5555), ("CN", 1111.444)])
    }

    fn service(
        shipments: Arc<StaticFetcher<ShipmentContents>>,
        track: Arc<StaticFetcher<TrackStatus>>,
        pricing: Arc<StaticFetcher<Price>>,
    ) -> AggregationService {
        let config = BatchConfig::new(5, DELAY);
        AggregationService::new(
            BatchingCoalescer::new(ResourceKind::Shipments, config, shipments),
            BatchingCoalescer::new(ResourceKind::Track, config, track),
            BatchingCoalescer::new(ResourceKind::Pricing, config, pricing),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_all_resources() {
        let service = service(shipments_fetcher(), track_fetcher(), pricing_fetcher());
        let request = AggregationRequest::from_csv(Some("555,666"), Some("111,222"), Some("CN,NL"));
        let start = Instant::now();

        let result = service.aggregate(&request).await;

        assert!(start.elapsed() >= DELAY);
        assert_eq!(result.shipments["555"], Some(vec!["box".to_string()]));
        assert_eq!(result.track["222"], Some("COLLECTING".to_string()));
        assert_eq!(result.pricing["NL"], Some(2222.5555));
        assert_eq!(result.missing_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resource_does_not_affect_others() {
        let service = service(StaticFetcher::failing(), track_fetcher(), pricing_fetcher());
        let request = AggregationRequest::from_csv(Some("555,666"), Some("111"), Some("CN"));

        let result = service.aggregate(&request).await;

        assert_eq!(result.shipments.len(), 2);
        assert!(result.shipments.values().all(Option::is_none));
        assert_eq!(result.track["111"], Some("NEW".to_string()));
        assert_eq!(result.pricing["CN"], Some(1111.444));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_request_makes_no_calls() {
        let (shipments, track, pricing) = (shipments_fetcher(), track_fetcher(), pricing_fetcher());
        let service = service(shipments.clone(), track.clone(), pricing.clone());
        let start = Instant::now();

        let result = service.aggregate(&AggregationRequest::default()).await;

        assert!(result.is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(shipments.calls.load(Ordering::SeqCst), 0);
        assert_eq!(track.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pricing.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_aggregations_share_calls() {
        let track = track_fetcher();
        let service = service(shipments_fetcher(), track.clone(), pricing_fetcher());

        let first = AggregationRequest::from_csv(None, Some("111"), None);
        let second = AggregationRequest::from_csv(None, Some("111,222"), None);
        let (first, second) = tokio::join!(service.aggregate(&first), service.aggregate(&second));

        assert_eq!(first.track["111"], second.track["111"]);
        assert_eq!(second.track.len(), 2);
        assert!(first.shipments.is_empty());
        assert_eq!(track.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batches_skip_debounce() {
        let service = service(shipments_fetcher(), track_fetcher(), pricing_fetcher());
        let request = AggregationRequest::from_csv(
            Some("0,666,777,888,999"),
            Some("111,222,333,444,555"),
            Some("BE,CN,NL,UK,US"),
        );
        let start = Instant::now();

        let result = service.aggregate(&request).await;

        assert!(start.elapsed() < DELAY / 2);
        assert_eq!(result.shipments.len(), 5);
        assert_eq!(result.shipments["0"], None);
        assert_eq!(result.track["111"], Some("NEW".to_string()));
        assert_eq!(result.pricing["US"], None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_resolves_pending() {
        let service = service(shipments_fetcher(), track_fetcher(), pricing_fetcher());
        let request = AggregationRequest::from_csv(Some("555"), Some("111"), Some("NL"));
        let start = Instant::now();

        let aggregating = tokio::spawn({
            let service = service.clone();
            async move { service.aggregate(&request).await }
        });
        // Pricing is requested last
        while service.pricing.stats().await.pending == 0 {
            tokio::task::yield_now().await;
        }
        service.flush_all().await;

        let result = aggregating.await.unwrap();
        assert!(start.elapsed() < DELAY);
        assert_eq!(result.missing_count(), 0);
    }
}
