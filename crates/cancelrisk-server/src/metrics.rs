//! Prometheus metrics for the prediction service.
//!
//! Provides a [`Metrics`] struct holding the collectors and a handler that
//! renders them in Prometheus exposition text format at `/metrics`.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::service::AppState;

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Holds all Prometheus metric collectors for the service.
///
/// Constructed once at startup and shared via [`AppState`].
#[derive(Clone)]
pub struct Metrics {
    /// Private registry so tests do not share state through the global one.
    registry: Registry,

    /// Prediction requests, labelled by outcome
    /// (`ok|unavailable|no_data|missing_fields|invalid_values|payload_too_large|internal`).
    pub predictions_total: IntCounterVec,

    /// Successful predictions, labelled by predicted class (`0|1`).
    pub predicted_class_total: IntCounterVec,

    /// Wall-clock time spent handling `POST /predecir`.
    pub prediction_duration_seconds: Histogram,

    /// 1 while a classifier is loaded, 0 in degraded mode.
    pub model_loaded: IntGauge,
}

impl Metrics {
    /// Create a new `Metrics` instance with all collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector fails to register.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let predictions_total = IntCounterVec::new(
            Opts::new(
                "cancelrisk_predictions_total",
                "Prediction requests by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(predictions_total.clone()))?;

        let predicted_class_total = IntCounterVec::new(
            Opts::new(
                "cancelrisk_predicted_class_total",
                "Successful predictions by predicted class",
            ),
            &["class"],
        )?;
        registry.register(Box::new(predicted_class_total.clone()))?;

        let prediction_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cancelrisk_prediction_duration_seconds",
                "Time spent handling prediction requests",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(prediction_duration_seconds.clone()))?;

        let model_loaded = IntGauge::new(
            "cancelrisk_model_loaded",
            "Whether a classifier is loaded (1) or the service is degraded (0)",
        )?;
        registry.register(Box::new(model_loaded.clone()))?;

        Ok(Self {
            registry,
            predictions_total,
            predicted_class_total,
            prediction_duration_seconds,
            model_loaded,
        })
    }

    /// Render every registered metric in text exposition format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    // -- convenience helpers ------------------------------------------------

    /// Record one finished prediction request.
    pub fn record_prediction(&self, outcome: &str, duration_secs: f64) {
        self.predictions_total.with_label_values(&[outcome]).inc();
        self.prediction_duration_seconds.observe(duration_secs);
    }

    /// Record the class of a successful prediction.
    pub fn record_class(&self, class: u8) {
        let label = if class == 1 { "1" } else { "0" };
        self.predicted_class_total.with_label_values(&[label]).inc();
    }

    /// Reflect whether a classifier is available.
    pub fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.set(i64::from(loaded));
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.gather_text() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("Failed to gather metrics: {e}"),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new_succeeds() {
        let m = Metrics::new().unwrap();
        let text = m.gather_text().unwrap();
        assert!(text.contains("cancelrisk_model_loaded 0"));
    }

    #[test]
    fn test_record_prediction_increments_counter() {
        let m = Metrics::new().unwrap();
        m.record_prediction("ok", 0.002);
        m.record_prediction("ok", 0.003);
        m.record_prediction("unavailable", 0.0001);

        let text = m.gather_text().unwrap();
        assert!(text.contains("cancelrisk_predictions_total{outcome=\"ok\"} 2"));
        assert!(text.contains("cancelrisk_predictions_total{outcome=\"unavailable\"} 1"));
        assert!(text.contains("cancelrisk_prediction_duration_seconds_count 3"));
    }

    #[test]
    fn test_record_class_and_model_gauge() {
        let m = Metrics::new().unwrap();
        m.record_class(1);
        m.record_class(0);
        m.record_class(1);
        m.set_model_loaded(true);

        let text = m.gather_text().unwrap();
        assert!(text.contains("cancelrisk_predicted_class_total{class=\"1\"} 2"));
        assert!(text.contains("cancelrisk_predicted_class_total{class=\"0\"} 1"));
        assert!(text.contains("cancelrisk_model_loaded 1"));
    }

    #[test]
    fn test_separate_instances_do_not_share_counts() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_prediction("internal", 0.1);
        let text = b.gather_text().unwrap();
        assert!(!text.contains("outcome=\"internal\""));
    }
}
