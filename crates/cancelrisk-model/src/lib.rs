//! Classifier adapters for cancelrisk model artifacts.
//!
//! A model artifact is a JSON document exported from the training pipeline.
//! It names its input columns (in training order, with the category
//! vocabulary of every categorical column) and carries the fitted
//! parameters of one of the supported model families:
//!
//! - `random_forest`: an ensemble of binary decision trees in flat-array
//!   form, see [`RandomForestClassifier`].
//! - `logistic_regression`: a linear model with a sigmoid link, see
//!   [`LogisticRegressionClassifier`].
//!
//! Both implement [`cancelrisk_core::Classifier`]. Request values are coerced
//! and one-hot encoded by [`DesignEncoder`] at inference time, so a value
//! that does not fit its column surfaces as
//! [`cancelrisk_core::InferenceError::InvalidInput`].

pub mod artifact;
pub mod encoding;
pub mod forest;
pub mod logistic;

pub use artifact::{ArtifactColumn, ModelArtifact};
pub use encoding::DesignEncoder;
pub use forest::{DecisionTree, RandomForestClassifier};
pub use logistic::LogisticRegressionClassifier;

use cancelrisk_core::{Classifier, FeatureSchema};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors raised while loading a model artifact.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The artifact file does not exist.
    #[error("model artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The artifact file exists but could not be read.
    #[error("failed to read model artifact {}: {source}", path.display())]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The artifact is not valid JSON for any supported model type.
    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    /// The artifact parsed but its parameters are inconsistent.
    #[error("invalid model artifact: {0}")]
    Invalid(String),

    /// The artifact's columns differ from the configured schema.
    #[error("model columns do not match schema: {0}")]
    SchemaMismatch(String),
}

impl From<ModelError> for cancelrisk_core::CancelRiskError {
    fn from(e: ModelError) -> Self {
        cancelrisk_core::CancelRiskError::Model(e.to_string())
    }
}

/// Load the artifact at `path` and build a classifier for `schema`.
///
/// The artifact must declare exactly the schema's columns, in the same order
/// and with the same kinds.
///
/// # Errors
///
/// Returns [`ModelError::NotFound`] for a missing file, and the other
/// [`ModelError`] variants for unreadable, malformed or mismatched artifacts.
pub fn load_classifier(
    path: &Path,
    schema: &FeatureSchema,
) -> Result<Arc<dyn Classifier>, ModelError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ModelError::NotFound(path.to_path_buf())
        } else {
            ModelError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let artifact = ModelArtifact::from_json(&contents)?;
    artifact.check_schema(schema)?;
    let classifier = artifact.into_classifier()?;

    let info = classifier.info();
    tracing::debug!(
        path = %path.display(),
        model_type = %info.model_type,
        estimators = info.estimators,
        columns = info.columns.len(),
        "Model artifact loaded"
    );

    Ok(classifier)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cancelrisk_core::SchemaVersion;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(value: &serde_json::Value) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(value.to_string().as_bytes()).unwrap();
        f
    }

    fn v1_columns() -> serde_json::Value {
        let schema = FeatureSchema::preset(SchemaVersion::V1).unwrap();
        schema
            .names()
            .map(|name| json!({"name": name, "kind": "numeric"}))
            .collect()
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let schema = FeatureSchema::preset(SchemaVersion::V1).unwrap();
        let result = load_classifier(Path::new("/nonexistent/forest.json"), &schema);
        assert!(matches!(result, Err(ModelError::NotFound(_))));
    }

    #[test]
    fn test_load_garbage_is_parse_error() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"\x80\x04\x95 not json").unwrap();
        let schema = FeatureSchema::preset(SchemaVersion::V1).unwrap();
        let result = load_classifier(f.path(), &schema);
        assert!(result.is_err());
        assert!(!matches!(result, Err(ModelError::NotFound(_))));
    }

    #[test]
    fn test_load_logistic_artifact() {
        let artifact = json!({
            "model_type": "logistic_regression",
            "columns": v1_columns(),
            "coefficients": [0.0, 0.0, 0.0, 0.0, 0.0, 4.0],
            "intercept": -2.0
        });
        let f = write_json(&artifact);
        let schema = FeatureSchema::preset(SchemaVersion::V1).unwrap();
        let classifier = load_classifier(f.path(), &schema).unwrap();
        assert_eq!(classifier.info().model_type, "logistic_regression");
        assert_eq!(classifier.info().columns.len(), 6);
    }

    #[test]
    fn test_load_rejects_schema_mismatch() {
        let artifact = json!({
            "model_type": "logistic_regression",
            "columns": v1_columns(),
            "coefficients": [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            "intercept": 0.0
        });
        let f = write_json(&artifact);
        let schema = FeatureSchema::preset(SchemaVersion::V2).unwrap();
        let result = load_classifier(f.path(), &schema);
        assert!(matches!(result, Err(ModelError::SchemaMismatch(_))));
    }

    #[test]
    fn test_model_error_converts_to_core_error() {
        let err: cancelrisk_core::CancelRiskError =
            ModelError::Invalid("no trees".to_string()).into();
        assert!(err.to_string().contains("no trees"));
    }
}
