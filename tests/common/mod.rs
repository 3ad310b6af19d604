//! Common test utilities

use std::time::Duration;

use aggregator::aggregation::AggregationService;
use aggregator::config::Config;
use aggregator::models::ResourceKind;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Shipment contents known to the mock downstream
pub fn shipments_body() -> Value {
    json!({"555": ["box"], "666": ["envelope"]})
}

/// Track statuses known to the mock downstream
pub fn track_body() -> Value {
    json!({"111": "NEW", "222": "COLLECTING"})
}

/// Prices known to the mock downstream
pub fn pricing_body() -> Value {
    json!({"NL": 2222.5555, "CN": 1111.444})
}

/// Configuration pointing every resource at `server`
pub fn config_for(server: &MockServer, flush_delay: Duration, request_timeout: Duration) -> Config {
    let mut config = Config::default();
    config.downstream.base_url = server.uri();
    config.downstream.request_timeout_ms = request_timeout.as_millis() as u64;

    for kind in ResourceKind::all() {
        config.resources.get_mut(kind).flush_delay_ms = flush_delay.as_millis() as u64;
    }

    config
}

/// Service backed by `server` with default capacity
pub fn service_for(server: &MockServer, flush_delay: Duration) -> AggregationService {
    AggregationService::from_config(&config_for(server, flush_delay, Duration::from_secs(2)))
        .unwrap()
}

/// Mount a 200 response for one resource path
pub async fn mount_ok(server: &MockServer, resource: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(resource))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount a 200 response for one exact batch, expected exactly `calls` times
#[allow(dead_code)]
pub async fn mount_batch(server: &MockServer, resource: &str, q: &str, body: Value, calls: u64) {
    Mock::given(method("GET"))
        .and(path(resource))
        .and(query_param("q", q))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(calls)
        .mount(server)
        .await;
}

/// Mount the three known-data responses
pub async fn mount_all_ok(server: &MockServer) {
    mount_ok(server, "/shipments", shipments_body()).await;
    mount_ok(server, "/track", track_body()).await;
    mount_ok(server, "/pricing", pricing_body()).await;
}
