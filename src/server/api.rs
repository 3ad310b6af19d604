//! REST API handlers for the aggregation server

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::models::AggregationRequest;

use super::AppState;

// ============================================================================
// API Types
// ============================================================================

/// Query parameters of `GET /aggregation`, each a comma-separated list
#[derive(Debug, Default, Deserialize)]
pub struct AggregationParams {
    pub shipments: Option<String>,
    pub track: Option<String>,
    pub pricing: Option<String>,
}

impl AggregationParams {
    /// Parse into a request; absent parameters become empty sets
    pub fn into_request(self) -> AggregationRequest {
        AggregationRequest::from_csv(
            self.shipments.as_deref(),
            self.track.as_deref(),
            self.pricing.as_deref(),
        )
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/aggregation", get(aggregate))
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Aggregate shipments, track and pricing lookups
async fn aggregate(
    State(state): State<AppState>,
    Query(params): Query<AggregationParams>,
) -> impl IntoResponse {
    let request = params.into_request();
    tracing::debug!(
        shipments = request.shipments.len(),
        track = request.track.len(),
        pricing = request.pricing.len(),
        "Aggregation requested"
    );

    let aggregation = state.service.aggregate(&request).await;
    metrics::record_api_request("/aggregation", StatusCode::OK.as_u16());

    Json(aggregation)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    })
}

/// Prometheus text exposition
async fn prometheus_metrics() -> axum::response::Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to encode metrics")),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
