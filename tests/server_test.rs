//! HTTP API tests over a real listener

mod common;

use std::time::Duration;

use aggregator::config::ServerConfig;
use aggregator::models::Aggregation;
use aggregator::server::AggregationServer;
use tokio::sync::oneshot;
use wiremock::MockServer;

use common::{mount_all_ok, service_for};

#[tokio::test]
async fn test_serve_aggregation_and_shutdown() {
    let mock_server = MockServer::start().await;
    mount_all_ok(&mock_server).await;

    let server = AggregationServer::new(
        ServerConfig::default(),
        service_for(&mock_server, Duration::from_millis(100)),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let client = reqwest::Client::new();

    let aggregation: Aggregation = client
        .get(format!(
            "http://{addr}/aggregation?shipments=555&track=111,999&pricing=NL"
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(aggregation.shipments["555"], Some(vec!["box".to_string()]));
    assert_eq!(aggregation.track["111"], Some("NEW".to_string()));
    assert_eq!(aggregation.track["999"], None);
    assert_eq!(aggregation.pricing["NL"], Some(2222.5555));

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_missing_parameters_return_empty_maps() {
    let mock_server = MockServer::start().await;

    let server = AggregationServer::new(
        ServerConfig::default(),
        service_for(&mock_server, Duration::from_millis(100)),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/aggregation?track="))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        serde_json::json!({"shipments": {}, "track": {}, "pricing": {}})
    );

    shutdown_tx.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_flushes_in_flight_aggregation() {
    let mock_server = MockServer::start().await;
    mount_all_ok(&mock_server).await;

    let flush_delay = Duration::from_secs(3);
    let server = AggregationServer::new(ServerConfig::default(), service_for(&mock_server, flush_delay));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let start = std::time::Instant::now();
    let in_flight = tokio::spawn(async move {
        reqwest::get(format!("http://{addr}/aggregation?track=111"))
            .await
            .unwrap()
            .json::<Aggregation>()
            .await
            .unwrap()
    });

    // Let the request reach the coalescer before shutting down
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(()).unwrap();

    let aggregation = in_flight.await.unwrap();
    assert!(start.elapsed() < flush_delay / 2);
    assert_eq!(aggregation.track["111"], Some("NEW".to_string()));

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
