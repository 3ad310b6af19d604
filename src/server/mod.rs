//! Inbound HTTP server
//!
//! Exposes the aggregation service over HTTP and drains the coalescers on
//! shutdown.

pub mod api;

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::aggregation::AggregationService;
use crate::config::{Config, ServerConfig};
use crate::error::{Error, Result};

pub use api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Aggregation service
    pub service: AggregationService,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Aggregation Server
// ============================================================================

/// HTTP server in front of an [`AggregationService`]
pub struct AggregationServer {
    config: ServerConfig,
    state: AppState,
}

impl AggregationServer {
    /// Validate `config` and build a server backed by HTTP coalescers
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid configuration and `Error::Fetch`
    /// if the downstream client cannot be created
    pub fn from_config(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(format!("{e:#}")))?;

        let service = AggregationService::from_config(config)?;
        Ok(Self::new(config.server.clone(), service))
    }

    /// Create a new aggregation server
    pub fn new(config: ServerConfig, service: AggregationService) -> Self {
        let state = AppState {
            service,
            start_time: Instant::now(),
        };

        Self { config, state }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Address the server binds to
    pub fn bind_address(&self) -> SocketAddr {
        self.config.bind_address
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves
    ///
    /// # Errors
    ///
    /// Returns `Error::Server` if the address cannot be bound or serving fails
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = self.config.bind_address;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                message: e.to_string(),
            })?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener until `shutdown_signal` resolves.
    ///
    /// Pending lookups are flushed as soon as the signal fires, so in-flight
    /// aggregations complete without waiting out the debounce delay while
    /// connections drain.
    ///
    /// # Errors
    ///
    /// Returns `Error::Server` if serving fails
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();
        let addr = listener.local_addr().map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Starting aggregation server on {} (with graceful shutdown)", addr);

        let service = self.state.service.clone();
        let drain = async move {
            shutdown_signal.await;
            tracing::info!("Shutdown requested, flushing pending lookups");
            service.flush_all().await;
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(drain)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Aggregation server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind {addr}: {message}")]
    Bind { addr: SocketAddr, message: String },

    /// Server error
    #[error("Server error: {0}")]
    Serve(String),
}

// ============================================================================
// Tests
// ============================================================================
