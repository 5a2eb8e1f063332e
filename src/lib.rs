//! Keygate - an API key gateway for a local Ollama server
//!
//! This library admits generation requests only from holders of a valid, active API key,
//! throttles each key to its configured number of requests per minute, and forwards admitted
//! requests to the Ollama backend.

use axum::Router;
use axum::routing::{get, post};
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use tracing::{info, instrument};

pub mod admin;
pub mod auth;
pub mod client;
pub mod clock;
pub mod errors;
pub mod gate;
pub mod handlers;
pub mod limiter;
pub mod models;
pub mod proxy;
pub mod sqlite_store;
pub mod traits;

use client::{HttpClient, HyperClient, PoolConfig};
use gate::AdmissionGate;
use handlers::{generate, health};
use proxy::Backend;

/// The main application state: the admission gate in front of the backend, and the HTTP client
/// used to reach it.
#[derive(Clone, Debug)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub gate: AdmissionGate,
    pub backend: Backend,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client
    pub fn new(gate: AdmissionGate, backend: Backend, pool: PoolConfig) -> Self {
        let http_client = client::create_hyper_client(pool);
        Self {
            http_client,
            gate,
            backend,
        }
    }
}

impl<T: HttpClient> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing)
    pub fn with_client(gate: AdmissionGate, backend: Backend, http_client: T) -> Self {
        Self {
            http_client,
            gate,
            backend,
        }
    }
}

/// Build the main router for the gateway
/// This creates routes for:
/// - `/health` - Key-checked liveness probe, exempt from rate limiting
/// - `/generate` - Admitted against the caller's key, then forwarded to Ollama
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .with_state(state)
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// # Parameters
/// - `prefix`: A string prefix for the metrics, which can be either a string literal or an owned string.
///   The `'static` lifetime is required by the Prometheus metrics layer.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}
