//! Prediction request handling.
//!
//! `POST /predecir` runs the pipeline: availability check, body decoding,
//! schema validation, feature-row assembly, inference on the blocking pool,
//! decision, JSON response. Every failure is converted to a JSON error body
//! with a status code at this boundary.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use cancelrisk_core::{
    validate_request, Classifier, DecisionPolicy, FeatureRow, FeatureSchema, InferenceError,
    RequestError, ServiceConfig,
};
use cancelrisk_model::{load_classifier, ModelError};
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::shutdown::InferenceTracker;

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state threaded through axum handlers via [`State`].
///
/// Built once at startup; nothing in it is written afterwards.
pub struct AppState {
    /// Service configuration.
    pub config: ServiceConfig,
    /// Active feature schema.
    pub schema: FeatureSchema,
    /// Active decision policy.
    pub policy: DecisionPolicy,
    /// Loaded classifier, `None` in degraded mode.
    pub classifier: Option<Arc<dyn Classifier>>,
    /// Prometheus collectors.
    pub metrics: Metrics,
    /// Runs and tracks inference for graceful shutdown.
    pub inference: InferenceTracker,
}

impl AppState {
    /// Build the state around an already-loaded (or absent) classifier.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid schema or policy, or if metrics
    /// cannot be registered.
    pub fn new(
        config: ServiceConfig,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> anyhow::Result<Self> {
        let schema = config.resolve_schema()?;
        let policy = config.resolve_policy(&schema)?;
        let metrics = Metrics::new()?;
        metrics.set_model_loaded(classifier.is_some());
        let inference =
            InferenceTracker::new(Duration::from_secs(config.shutdown.timeout_seconds));
        Ok(Self {
            config,
            schema,
            policy,
            classifier,
            metrics,
            inference,
        })
    }

    /// Returns `true` if a classifier is available.
    pub fn is_model_loaded(&self) -> bool {
        self.classifier.is_some()
    }
}

/// Load the configured model artifact, logging and swallowing any failure.
///
/// A `None` result puts the service in degraded mode for the life of the
/// process.
pub fn load_model(config: &ServiceConfig, schema: &FeatureSchema) -> Option<Arc<dyn Classifier>> {
    let path = Path::new(&config.model.path);
    match load_classifier(path, schema) {
        Ok(classifier) => {
            let info = classifier.info();
            info!(
                path = %path.display(),
                model_type = %info.model_type,
                estimators = info.estimators,
                schema_version = %schema.version(),
                "Classification model loaded"
            );
            Some(classifier)
        }
        Err(ModelError::NotFound(missing)) => {
            error!(
                path = %missing.display(),
                "Model artifact not found; predictions will be rejected with 503"
            );
            None
        }
        Err(e) => {
            error!(
                path = %path.display(),
                error = %e,
                "Unexpected error loading model artifact; predictions will be rejected with 503"
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Successful prediction body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Human-readable label.
    #[serde(rename = "prediccion_texto")]
    pub label: String,
    /// 1 = cancelled, 0 = not cancelled.
    #[serde(rename = "prediccion_clase")]
    pub class: u8,
    /// Positive-class probability rounded to 4 decimals.
    #[serde(rename = "probabilidad_de_cancelacion")]
    pub probability: f64,
}

const MSG_UNAVAILABLE: &str =
    "El modelo de predicción no está disponible. Revisa los logs del servidor.";
const MSG_NO_DATA: &str = "No se recibieron datos en la petición. Se esperaba un JSON.";
const MSG_MISSING_FIELDS: &str = "Petición inválida. Faltan características requeridas.";
const MSG_INVALID_VALUES: &str =
    "Error en los datos de entrada. Asegúrate de que todos los valores sean numéricos.";
const MSG_TOO_LARGE: &str = "La petición excede el tamaño máximo permitido.";
const MSG_INTERNAL: &str = "Ocurrió un error interno en el servidor.";

const INDEX_HTML: &str = "<h1>API de Predicción de Cancelaciones</h1>\
<p>El servicio está activo. Usa el endpoint /predecir para obtener una predicción.</p>";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of `POST /predecir`, each mapped to a status and JSON body.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    /// No classifier is loaded.
    #[error("classifier unavailable")]
    ServiceUnavailable,
    /// Body absent, not JSON, or not an object.
    #[error("no JSON object in request")]
    NoData,
    /// Required fields absent, in schema order.
    #[error("missing required fields: {0:?}")]
    MissingFields(Vec<String>),
    /// Values rejected by the classifier; detail is returned to the caller.
    #[error("invalid input values: {0}")]
    InvalidValues(String),
    /// Body exceeds the configured size limit.
    #[error("request body too large")]
    PayloadTooLarge,
    /// Anything else; detail is only logged.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PredictError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoData | Self::MissingFields(_) | Self::InvalidValues(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label for this error.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "unavailable",
            Self::NoData => "no_data",
            Self::MissingFields(_) => "missing_fields",
            Self::InvalidValues(_) => "invalid_values",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<RequestError> for PredictError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::NoData => Self::NoData,
            RequestError::MissingFields(missing) => Self::MissingFields(missing),
        }
    }
}

impl From<InferenceError> for PredictError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::InvalidInput(detail) => Self::InvalidValues(detail),
            InferenceError::Internal(detail) => Self::Internal(detail),
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::ServiceUnavailable => json!({ "error": MSG_UNAVAILABLE }),
            Self::NoData => json!({ "error": MSG_NO_DATA }),
            Self::MissingFields(missing) => json!({
                "error": MSG_MISSING_FIELDS,
                "caracteristicas_faltantes": missing,
            }),
            Self::InvalidValues(detail) => json!({
                "error": format!("{MSG_INVALID_VALUES} Detalle: {detail}"),
            }),
            Self::PayloadTooLarge => json!({ "error": MSG_TOO_LARGE }),
            Self::Internal(_) => json!({ "error": MSG_INTERNAL }),
        };
        (self.status(), Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `application/json` or any `application/*+json` media type.
fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let essence = ct
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            essence == "application/json"
                || (essence.starts_with("application/") && essence.ends_with("+json"))
        })
        .unwrap_or(false)
}

/// Classify a body read failure: over the limit is 413, anything else
/// (client disconnect, transport error) means no data arrived.
fn body_read_error(err: &axum::Error, limit: usize) -> PredictError {
    let over_limit = std::error::Error::source(err)
        .is_some_and(|source| source.is::<LengthLimitError>());
    if over_limit {
        warn!(limit, "Request body exceeds the size limit");
        PredictError::PayloadTooLarge
    } else {
        warn!(error = %err, "Failed to read request body");
        PredictError::NoData
    }
}

/// Decode the body as JSON, `None` when it is absent, undeclared or malformed.
fn decode_json_body(is_json: bool, bytes: &[u8]) -> Option<Value> {
    if !is_json || bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Request body is not valid JSON");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /`: static status page.
pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /health`: JSON status including whether a model is loaded.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let model = state.classifier.as_ref().map(|c| c.info());
    Json(json!({
        "status": if model.is_some() { "healthy" } else { "degraded" },
        "model_loaded": model.is_some(),
        "schema_version": state.schema.version().to_string(),
        "policy": state.policy,
        "model": model,
    }))
}

/// `POST /predecir`: predict the cancellation risk of one order.
pub async fn predict_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response {
    let started = Instant::now();
    let result = run_prediction(&state, req).await;

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.outcome(),
    };
    state
        .metrics
        .record_prediction(outcome, started.elapsed().as_secs_f64());

    match result {
        Ok(response) => {
            state.metrics.record_class(response.class);
            Json(response).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn run_prediction(
    state: &Arc<AppState>,
    req: Request<Body>,
) -> Result<PredictionResponse, PredictError> {
    // Availability is checked before the body is even read.
    let classifier = state.classifier.clone().ok_or_else(|| {
        warn!("Prediction requested but no model is loaded");
        PredictError::ServiceUnavailable
    })?;

    let is_json = has_json_content_type(req.headers());
    let limit = usize::try_from(state.config.max_request_size_bytes).unwrap_or(usize::MAX);
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| body_read_error(&e, limit))?;

    let payload = decode_json_body(is_json, &bytes);
    if let Some(ref body) = payload {
        debug!(%body, "Prediction request received");
    }

    let request = validate_request(&state.schema, payload.as_ref()).map_err(|e| {
        if let RequestError::MissingFields(ref missing) = e {
            warn!(?missing, "Invalid request: required features missing");
        } else {
            warn!("Invalid request: no JSON object supplied");
        }
        PredictError::from(e)
    })?;

    let row = FeatureRow::assemble(&state.schema, request)?;
    debug!(?row, "Feature row assembled");

    let policy = state.policy.clone();
    let decision = state
        .inference
        .spawn_inference(move || policy.decide(classifier.as_ref(), &row))
        .await
        .map_err(|e| {
            error!(error = %e, "Inference task failed");
            PredictError::Internal(e.to_string())
        })?
        .map_err(|e| {
            match &e {
                InferenceError::InvalidInput(detail) => {
                    error!(%detail, "Invalid data types in request");
                }
                InferenceError::Internal(detail) => {
                    error!(%detail, "Unexpected error during prediction");
                }
            }
            PredictError::from(e)
        })?;

    let label = state.config.labels.text_for(decision.class).to_string();
    info!(
        class = decision.class,
        probability = decision.probability,
        %label,
        "Prediction succeeded"
    );

    Ok(PredictionResponse {
        label,
        class: decision.class,
        probability: decision.rounded_probability(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn headers_with(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap(),
        );
        headers
    }

    #[test]
    fn test_json_content_types() {
        assert!(has_json_content_type(&headers_with("application/json")));
        assert!(has_json_content_type(&headers_with(
            "Application/JSON; charset=utf-8"
        )));
        assert!(has_json_content_type(&headers_with(
            "application/problem+json"
        )));
        assert!(!has_json_content_type(&headers_with("text/plain")));
        assert!(!has_json_content_type(&HeaderMap::new()));
    }

    #[test]
    fn test_decode_json_body() {
        assert_eq!(decode_json_body(true, b"{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(decode_json_body(true, b""), None);
        assert_eq!(decode_json_body(true, b"{not json"), None);
        assert_eq!(decode_json_body(false, b"{\"a\":1}"), None);
    }

    #[tokio::test]
    async fn test_missing_fields_body() {
        let err = PredictError::MissingFields(vec!["num__a".into(), "num__b".into()]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], MSG_MISSING_FIELDS);
        assert_eq!(body["caracteristicas_faltantes"], json!(["num__a", "num__b"]));
    }

    #[tokio::test]
    async fn test_invalid_values_body_includes_detail() {
        let err = PredictError::from(InferenceError::InvalidInput(
            "could not convert string to float: 'abc'".into(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with(MSG_INVALID_VALUES));
        assert!(message.ends_with("Detalle: could not convert string to float: 'abc'"));
        assert!(body.get("caracteristicas_faltantes").is_none());
    }

    #[tokio::test]
    async fn test_internal_body_hides_detail() {
        let err = PredictError::from(InferenceError::Internal("tree 3 exploded".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, json!({ "error": MSG_INTERNAL }));
    }

    #[tokio::test]
    async fn test_body_over_limit_is_payload_too_large() {
        let err = axum::body::to_bytes(Body::from("0123456789"), 4)
            .await
            .unwrap_err();
        let mapped = body_read_error(&err, 4);
        assert!(matches!(mapped, PredictError::PayloadTooLarge));
        assert_eq!(mapped.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_body_transport_error_is_no_data() {
        let err = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        let mapped = body_read_error(&err, 1024);
        assert!(matches!(mapped, PredictError::NoData));
        assert_eq!(mapped.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unavailable_body() {
        let response = PredictError::ServiceUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body, json!({ "error": MSG_UNAVAILABLE }));
    }

    #[test]
    fn test_response_field_names() {
        let response = PredictionResponse {
            label: "Pedido probablemente Cancelado".to_string(),
            class: 1,
            probability: 0.8123,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "prediccion_texto": "Pedido probablemente Cancelado",
                "prediccion_clase": 1,
                "probabilidad_de_cancelacion": 0.8123
            })
        );
    }

    #[test]
    fn test_missing_model_file_means_degraded() {
        let config = ServiceConfig {
            model: cancelrisk_core::ModelConfig {
                path: "/nonexistent/model.json".to_string(),
            },
            ..ServiceConfig::default()
        };
        let schema = config.resolve_schema().unwrap();
        assert!(load_model(&config, &schema).is_none());
        let state = AppState::new(config, None).unwrap();
        assert!(!state.is_model_loaded());
    }
}
