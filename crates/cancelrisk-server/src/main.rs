//! Order-cancellation risk prediction server.
//!
//! Loads the configured classifier once at startup and serves `POST /predecir`
//! until SIGTERM/SIGINT. A missing or broken model artifact does not stop the
//! process; predictions are answered with 503 instead.

use cancelrisk_core::{LoggingConfig, ServiceConfig};
use cancelrisk_server::config::{config_path_from_env, load_config};
use cancelrisk_server::{build_app_state, build_router, shutdown_signal};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration: from CLI arg, env var, or default
    let config_path = config_path_from_env(std::env::args().nth(1));
    let config = load_service_config(config_path.as_deref())?;

    init_tracing(&config.logging);
    match &config_path {
        Some(path) => info!(path = %path.display(), "Loaded configuration from file"),
        None => info!("No config file specified, using defaults"),
    }

    info!(
        listen_addr = %config.listen_addr,
        model_path = %config.model.path,
        schema_version = %config.schema.version,
        "Starting cancellation risk service"
    );

    let listen_addr = config.listen_addr.clone();

    let state = build_app_state(config)?;
    let inference = state.inference.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(%listen_addr, "Prediction server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(inference.clone()))
        .await?;

    inference.drain().await;
    info!("Server stopped");
    Ok(())
}

/// Load service configuration from a YAML file or fall back to defaults.
///
/// Checks (in order):
/// 1. First CLI argument as config path
/// 2. `CANCELRISK_CONFIG` environment variable
/// 3. Default configuration
fn load_service_config(path: Option<&Path>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(ServiceConfig::default()),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    /// Build a test router whose model path does not exist.
    fn degraded_app() -> axum::Router {
        let config = ServiceConfig {
            model: cancelrisk_core::ModelConfig {
                path: "/nonexistent/modelo.json".to_string(),
            },
            ..ServiceConfig::default()
        };
        build_router(build_app_state(config).unwrap())
    }

    #[tokio::test]
    async fn test_index_endpoint() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = degraded_app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("API de Predicción de Cancelaciones"));
    }

    #[tokio::test]
    async fn test_predict_returns_503_without_model() {
        let req = Request::builder()
            .method("POST")
            .uri("/predecir")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = degraded_app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_build_app_state_succeeds_without_model() {
        let config = ServiceConfig {
            model: cancelrisk_core::ModelConfig {
                path: "/nonexistent/modelo.json".to_string(),
            },
            ..ServiceConfig::default()
        };
        let state = build_app_state(config).unwrap();
        assert!(!state.is_model_loaded());
    }
}
