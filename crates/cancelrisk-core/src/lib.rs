//! Core types, traits, and errors for cancelrisk
//!
//! This crate holds everything the model adapters and the HTTP service share:
//! the feature schema a model was trained on, the single-row feature table
//! handed to a classifier, the [`Classifier`] capability trait, the decision
//! policy that turns a probability into a class, and the service
//! configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Feature schema
// ---------------------------------------------------------------------------

/// Whether a feature column carries a number or a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Continuous or count-valued column.
    Numeric,
    /// Column whose values are labels from a fixed set.
    Categorical,
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::Categorical => write!(f, "categorical"),
        }
    }
}

/// A single named column of the feature schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureField {
    /// Request key and column name.
    pub name: String,
    /// Column kind.
    pub kind: FeatureKind,
}

impl FeatureField {
    /// Create a numeric field.
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Numeric,
        }
    }

    /// Create a categorical field.
    pub fn categorical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Categorical,
        }
    }
}

/// Named schema versions.
///
/// `V1`..`V4` are built-in presets; `Custom` means the field list comes from
/// configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Six numeric order features.
    #[default]
    V1,
    /// V1 plus customer type and order channel.
    V2,
    /// V1 fields, served with a decision threshold.
    V3,
    /// Presencial-channel flag plus seven numeric features.
    V4,
    /// Field list supplied by configuration.
    Custom,
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
            Self::V3 => write!(f, "v3"),
            Self::V4 => write!(f, "v4"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Numeric order features shared by the v1, v2 and v3 presets.
const ORDER_NUMERIC_FEATURES: [&str; 6] = [
    "num__total_a_pagar",
    "num__total_cantidad_productos",
    "num__total_productos_distintos",
    "num__stock_minimo_del_pedido",
    "num__total_categorias_distintas",
    "num__tasa_cancelaciones_historicas_cliente",
];

/// Categorical features added by the v2 preset.
const V2_CATEGORICAL_FEATURES: [&str; 2] = ["cat__tipo_cliente", "cat__canal_pedido"];

/// Ordered numeric features of the v4 preset (after its categorical flag).
const V4_NUMERIC_FEATURES: [&str; 7] = [
    "num__total_a_pagar",
    "num__total_cantidad_productos",
    "num__total_productos_distintos",
    "num__stock_minimo_del_pedido",
    "num__tasa_cancelaciones_historicas_cliente",
    "num__dias_anticipacion",
    "num__numero_cambios_estado",
];

/// Categorical flag leading the v4 preset.
const V4_FLAG_FEATURE: &str = "cat__canal_presencial";

/// Ordered list of the fields a model requires.
///
/// Column order is the order the model was trained with and cannot be
/// re-derived from the request, so it is always taken from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureSchema {
    version: SchemaVersion,
    fields: Vec<FeatureField>,
}

impl FeatureSchema {
    /// Build a schema from an explicit field list.
    ///
    /// # Errors
    ///
    /// Returns [`CancelRiskError::Config`] if the list is empty or contains a
    /// duplicate or blank name.
    pub fn new(version: SchemaVersion, fields: Vec<FeatureField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(CancelRiskError::Config(format!(
                "schema {version} has no fields"
            )));
        }
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(CancelRiskError::Config(format!(
                    "schema {version} contains a field with an empty name"
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(CancelRiskError::Config(format!(
                    "schema {version} lists field {} more than once",
                    field.name
                )));
            }
        }
        Ok(Self { version, fields })
    }

    /// Built-in schema for a named version, `None` for [`SchemaVersion::Custom`].
    pub fn preset(version: SchemaVersion) -> Option<Self> {
        let fields = match version {
            SchemaVersion::V1 | SchemaVersion::V3 => ORDER_NUMERIC_FEATURES
                .iter()
                .map(|name| FeatureField::numeric(*name))
                .collect(),
            SchemaVersion::V2 => ORDER_NUMERIC_FEATURES
                .iter()
                .map(|name| FeatureField::numeric(*name))
                .chain(
                    V2_CATEGORICAL_FEATURES
                        .iter()
                        .map(|name| FeatureField::categorical(*name)),
                )
                .collect(),
            SchemaVersion::V4 => std::iter::once(FeatureField::categorical(V4_FLAG_FEATURE))
                .chain(
                    V4_NUMERIC_FEATURES
                        .iter()
                        .map(|name| FeatureField::numeric(*name)),
                )
                .collect(),
            SchemaVersion::Custom => return None,
        };
        Some(Self { version, fields })
    }

    /// Schema version.
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// All fields in column order.
    pub fn fields(&self) -> &[FeatureField] {
        &self.fields
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in column order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Schema fields absent from `request`, preserving schema order.
    pub fn missing_fields(&self, request: &Map<String, Value>) -> Vec<String> {
        self.names()
            .filter(|name| !request.contains_key(*name))
            .map(str::to_string)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Request validation & feature-row assembly
// ---------------------------------------------------------------------------

/// Reasons a request body is rejected before inference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// No usable JSON object was supplied.
    #[error("no JSON object in request")]
    NoData,
    /// Required fields are absent, listed in schema order.
    #[error("missing required fields: {0:?}")]
    MissingFields(Vec<String>),
}

/// Check a decoded request body against the schema.
///
/// Anything other than a JSON object (absent body, `null`, `false`, `0`,
/// strings, arrays) is [`RequestError::NoData`]. An object, including the
/// empty object, is checked for missing fields. Extra keys are ignored and
/// values are not type-checked here.
pub fn validate_request<'a>(
    schema: &FeatureSchema,
    body: Option<&'a Value>,
) -> std::result::Result<&'a Map<String, Value>, RequestError> {
    let request = match body {
        Some(Value::Object(map)) => map,
        _ => return Err(RequestError::NoData),
    };
    let missing = schema.missing_fields(request);
    if missing.is_empty() {
        Ok(request)
    } else {
        Err(RequestError::MissingFields(missing))
    }
}

/// A single-row feature table: schema columns in schema order, each holding
/// the request value verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    columns: Vec<(String, Value)>,
}

impl FeatureRow {
    /// Assemble the row for `request`.
    ///
    /// No defaults are substituted and no value is coerced; any missing
    /// field is reported instead.
    pub fn assemble(
        schema: &FeatureSchema,
        request: &Map<String, Value>,
    ) -> std::result::Result<Self, RequestError> {
        let mut columns = Vec::with_capacity(schema.len());
        let mut missing = Vec::new();
        for name in schema.names() {
            match request.get(name) {
                Some(value) => columns.push((name.to_string(), value.clone())),
                None => missing.push(name.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(Self { columns })
        } else {
            Err(RequestError::MissingFields(missing))
        }
    }

    /// `(name, value)` pairs in column order.
    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Value of the named column.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }
}

// ---------------------------------------------------------------------------
// Classifier capability
// ---------------------------------------------------------------------------

/// Failure raised while running a classifier on a row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// A value is incompatible with its column (not numeric, unknown
    /// category, NaN). The message is safe to return to the caller.
    #[error("{0}")]
    InvalidInput(String),
    /// Anything else. The message is for logs only.
    #[error("inference failed: {0}")]
    Internal(String),
}

/// Description of a loaded classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Model family, e.g. `random_forest`.
    pub model_type: String,
    /// Input columns in training order.
    pub columns: Vec<FeatureField>,
    /// Number of estimators (trees) or 1 for single models.
    pub estimators: usize,
}

/// A binary classifier over a [`FeatureRow`].
///
/// Implementations are read-only after construction and are shared across
/// concurrent requests.
pub trait Classifier: Send + Sync {
    /// The classifier's own discrete decision, 0 or 1.
    fn classify(&self, row: &FeatureRow) -> std::result::Result<u8, InferenceError>;

    /// Probability of the positive (cancelled) class.
    fn score_probability(&self, row: &FeatureRow) -> std::result::Result<f64, InferenceError>;

    /// Static description of the model.
    fn info(&self) -> ModelInfo;
}

// ---------------------------------------------------------------------------
// Decision policy
// ---------------------------------------------------------------------------

/// How the discrete class is derived.
///
/// The two variants are different policies and are never reconciled: the
/// classifier's built-in boundary versus an externally imposed threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionPolicy {
    /// Use the classifier's own class prediction and report its probability
    /// alongside it, even if the two disagree.
    ClassifierDefault,
    /// Class 1 iff the positive-class probability is strictly greater than
    /// `threshold`.
    Threshold {
        /// Cut-off in `[0, 1]`.
        threshold: f64,
    },
}

impl DecisionPolicy {
    /// Policy a schema preset is served with when none is configured.
    pub fn preset_default(version: SchemaVersion) -> Self {
        match version {
            SchemaVersion::V3 => Self::Threshold { threshold: 0.80 },
            SchemaVersion::V4 => Self::Threshold { threshold: 0.85 },
            SchemaVersion::V1 | SchemaVersion::V2 | SchemaVersion::Custom => {
                Self::ClassifierDefault
            }
        }
    }

    /// Reject thresholds outside `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`CancelRiskError::Config`] for an out-of-range or NaN threshold.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ClassifierDefault => Ok(()),
            Self::Threshold { threshold } if (0.0..=1.0).contains(threshold) => Ok(()),
            Self::Threshold { threshold } => Err(CancelRiskError::Config(format!(
                "decision threshold must be within [0, 1], got {threshold}"
            ))),
        }
    }

    /// Run `classifier` on `row` and derive the decision.
    ///
    /// Under [`DecisionPolicy::Threshold`] only the probability routine is
    /// called and the comparison uses the unrounded probability.
    pub fn decide(
        &self,
        classifier: &dyn Classifier,
        row: &FeatureRow,
    ) -> std::result::Result<Decision, InferenceError> {
        let decision = match self {
            Self::ClassifierDefault => {
                let class = classifier.classify(row)?;
                let probability = classifier.score_probability(row)?;
                Decision { class, probability }
            }
            Self::Threshold { threshold } => {
                let probability = classifier.score_probability(row)?;
                Decision {
                    class: u8::from(probability > *threshold),
                    probability,
                }
            }
        };
        decision.check()
    }
}

/// Outcome of a decision: the class and the unrounded probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// 1 = cancelled, 0 = not cancelled.
    pub class: u8,
    /// Positive-class probability.
    pub probability: f64,
}

impl Decision {
    fn check(self) -> std::result::Result<Self, InferenceError> {
        if self.class > 1 {
            return Err(InferenceError::Internal(format!(
                "classifier returned class {}",
                self.class
            )));
        }
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(InferenceError::Internal(format!(
                "classifier returned probability {}",
                self.probability
            )));
        }
        Ok(self)
    }

    /// Probability rounded for display.
    pub fn rounded_probability(&self) -> f64 {
        round_probability(self.probability)
    }
}

/// Round a probability to 4 decimal digits.
///
/// Rounds the exact binary value through its decimal rendering, so
/// `0.16835` (stored just below the half-way point) becomes `0.1683`.
pub fn round_probability(probability: f64) -> f64 {
    format!("{probability:.4}").parse().unwrap_or(probability)
}

/// Human-readable texts for the two classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionLabels {
    /// Text for class 1.
    #[serde(default = "default_cancelled_label")]
    pub cancelled: String,
    /// Text for class 0.
    #[serde(default = "default_not_cancelled_label")]
    pub not_cancelled: String,
}

fn default_cancelled_label() -> String {
    "Pedido probablemente Cancelado".to_string()
}

fn default_not_cancelled_label() -> String {
    "Pedido probablemente No Cancelado".to_string()
}

impl Default for PredictionLabels {
    fn default() -> Self {
        Self {
            cancelled: default_cancelled_label(),
            not_cancelled: default_not_cancelled_label(),
        }
    }
}

impl PredictionLabels {
    /// Text for `class`; anything but 1 maps to the not-cancelled text.
    pub fn text_for(&self, class: u8) -> &str {
        if class == 1 {
            &self.cancelled
        } else {
            &self.not_cancelled
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level service configuration.
///
/// Every section has defaults so a partial YAML file is enough:
///
/// ```yaml
/// listen_addr: "0.0.0.0:5001"
/// model:
///   path: "modelo_random_forest_entrenado.json"
/// schema:
///   version: v3
/// policy:
///   kind: threshold
///   threshold: 0.8
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address and port to bind the HTTP server to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_request_size_bytes")]
    pub max_request_size_bytes: u64,
    /// Model artifact location.
    #[serde(default)]
    pub model: ModelConfig,
    /// Feature schema the model was trained on.
    #[serde(default)]
    pub schema: SchemaConfig,
    /// Decision policy; the schema preset's default when absent.
    #[serde(default)]
    pub policy: Option<DecisionPolicy>,
    /// Texts returned for each class.
    #[serde(default)]
    pub labels: PredictionLabels,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Graceful shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_max_request_size_bytes() -> u64 {
    1024 * 1024
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_request_size_bytes: default_max_request_size_bytes(),
            model: ModelConfig::default(),
            schema: SchemaConfig::default(),
            policy: None,
            labels: PredictionLabels::default(),
            logging: LoggingConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Resolve the configured schema.
    ///
    /// # Errors
    ///
    /// See [`SchemaConfig::resolve`].
    pub fn resolve_schema(&self) -> Result<FeatureSchema> {
        self.schema.resolve()
    }

    /// The configured policy, or the default for `schema`'s version.
    ///
    /// # Errors
    ///
    /// Returns [`CancelRiskError::Config`] for an invalid threshold.
    pub fn resolve_policy(&self, schema: &FeatureSchema) -> Result<DecisionPolicy> {
        let policy = self
            .policy
            .clone()
            .unwrap_or_else(|| DecisionPolicy::preset_default(schema.version()));
        policy.validate()?;
        Ok(policy)
    }

    /// Check the whole configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`CancelRiskError::Config`] found.
    pub fn validate(&self) -> Result<()> {
        let schema = self.resolve_schema()?;
        self.resolve_policy(&schema)?;
        if self.max_request_size_bytes == 0 {
            return Err(CancelRiskError::Config(
                "max_request_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.model.path.trim().is_empty() {
            return Err(CancelRiskError::Config(
                "model.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Model artifact section within [`ServiceConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the JSON model artifact.
    #[serde(default = "default_model_path")]
    pub path: String,
}

fn default_model_path() -> String {
    "modelo_random_forest_entrenado.json".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
        }
    }
}

/// Schema section within [`ServiceConfig`].
///
/// A preset version takes no field list; `custom` requires one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Preset name or `custom`.
    #[serde(default)]
    pub version: SchemaVersion,
    /// Ordered fields, only for `custom`.
    #[serde(default)]
    pub fields: Vec<FeatureField>,
}

impl SchemaConfig {
    /// Materialise the [`FeatureSchema`].
    ///
    /// # Errors
    ///
    /// Returns [`CancelRiskError::Config`] if a preset is combined with a
    /// field list, or a custom field list is invalid.
    pub fn resolve(&self) -> Result<FeatureSchema> {
        match FeatureSchema::preset(self.version) {
            Some(_) if !self.fields.is_empty() => Err(CancelRiskError::Config(format!(
                "schema version {} is a preset; set version: custom to supply fields",
                self.version
            ))),
            Some(schema) => Ok(schema),
            None => FeatureSchema::new(SchemaVersion::Custom, self.fields.clone()),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `text` (human-readable) or `json` (structured).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Seconds to wait for in-flight predictions after a shutdown signal.
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum CancelRiskError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model artifact error.
    #[error("Model error: {0}")]
    Model(String),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, CancelRiskError>`.
pub type Result<T> = std::result::Result<T, CancelRiskError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
