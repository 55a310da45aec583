//! Order-cancellation risk service: library interface.
//!
//! Exposes state construction and the router so that integration tests can
//! build the full HTTP surface without binding a socket.

pub mod config;
pub mod metrics;
pub mod service;
pub mod shutdown;

// Re-export key types for convenience
pub use metrics::{metrics_handler, Metrics};
pub use service::{
    health_handler, index_handler, load_model, predict_handler, AppState, PredictError,
    PredictionResponse,
};
pub use shutdown::{shutdown_signal, InferenceTracker};

use axum::routing::{get, post};
use axum::Router;
use cancelrisk_core::ServiceConfig;
use std::sync::Arc;

/// Build the shared [`AppState`], loading the model named by the config.
///
/// A model that fails to load leaves the service running in degraded mode
/// rather than failing startup.
///
/// # Errors
///
/// Returns an error for an invalid schema or policy, or if metrics cannot be
/// registered.
pub fn build_app_state(config: ServiceConfig) -> anyhow::Result<Arc<AppState>> {
    let schema = config.resolve_schema()?;
    let classifier = load_model(&config, &schema);
    Ok(Arc::new(AppState::new(config, classifier)?))
}

/// Build the axum [`Router`] with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/predecir", post(predict_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
