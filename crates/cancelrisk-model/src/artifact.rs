//! JSON model artifact format.
//!
//! ```json
//! {
//!   "model_type": "random_forest",
//!   "columns": [
//!     {"name": "cat__canal_presencial", "kind": "categorical", "categories": [0, 1]},
//!     {"name": "num__total_a_pagar", "kind": "numeric"}
//!   ],
//!   "trees": [
//!     {"children_left": [1, -1, -1], "children_right": [2, -1, -1],
//!      "feature": [2, -2, -2], "threshold": [1000.0, -2.0, -2.0],
//!      "value": [[5, 5], [4, 1], [1, 4]]}
//!   ]
//! }
//! ```
//!
//! Feature indices in trees and coefficient positions refer to the encoded
//! design vector, see [`DesignEncoder`](crate::encoding::DesignEncoder).

use cancelrisk_core::{Classifier, FeatureField, FeatureKind, FeatureSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::encoding::DesignEncoder;
use crate::forest::{RandomForestClassifier, TreeArtifact};
use crate::logistic::LogisticRegressionClassifier;
use crate::ModelError;

/// One input column of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactColumn {
    /// Numeric column; one design slot.
    Numeric {
        /// Column name.
        name: String,
    },
    /// Categorical column; one design slot per category (one-hot).
    Categorical {
        /// Column name.
        name: String,
        /// Category vocabulary seen at training time.
        categories: Vec<Value>,
    },
}

impl ArtifactColumn {
    /// Column name.
    pub fn name(&self) -> &str {
        match self {
            Self::Numeric { name } | Self::Categorical { name, .. } => name,
        }
    }

    /// Column kind.
    pub fn kind(&self) -> FeatureKind {
        match self {
            Self::Numeric { .. } => FeatureKind::Numeric,
            Self::Categorical { .. } => FeatureKind::Categorical,
        }
    }

    /// Number of design-vector slots this column expands to.
    pub fn width(&self) -> usize {
        match self {
            Self::Numeric { .. } => 1,
            Self::Categorical { categories, .. } => categories.len(),
        }
    }

    /// The schema field this column corresponds to.
    pub fn as_field(&self) -> FeatureField {
        FeatureField {
            name: self.name().to_string(),
            kind: self.kind(),
        }
    }
}

/// A parsed model artifact, tagged by `model_type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum ModelArtifact {
    /// Ensemble of decision trees averaged by probability.
    RandomForest {
        /// Input columns in training order.
        columns: Vec<ArtifactColumn>,
        /// Fitted trees.
        trees: Vec<TreeArtifact>,
    },
    /// Linear model with a sigmoid link.
    LogisticRegression {
        /// Input columns in training order.
        columns: Vec<ArtifactColumn>,
        /// One weight per design slot.
        coefficients: Vec<f64>,
        /// Bias term.
        intercept: f64,
    },
}

impl ModelArtifact {
    /// Parse an artifact from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Parse`] for malformed JSON or an unknown
    /// `model_type`.
    pub fn from_json(contents: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Input columns in training order.
    pub fn columns(&self) -> &[ArtifactColumn] {
        match self {
            Self::RandomForest { columns, .. } | Self::LogisticRegression { columns, .. } => {
                columns
            }
        }
    }

    /// Verify the artifact was trained on `schema`'s columns, in order.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SchemaMismatch`] naming the first difference.
    pub fn check_schema(&self, schema: &FeatureSchema) -> Result<(), ModelError> {
        let columns = self.columns();
        if columns.len() != schema.len() {
            return Err(ModelError::SchemaMismatch(format!(
                "artifact has {} columns, schema {} has {}",
                columns.len(),
                schema.version(),
                schema.len()
            )));
        }
        for (position, (column, field)) in columns.iter().zip(schema.fields()).enumerate() {
            if column.name() != field.name || column.kind() != field.kind {
                return Err(ModelError::SchemaMismatch(format!(
                    "column {position} is {} ({}) in the artifact but {} ({}) in the schema",
                    column.name(),
                    column.kind(),
                    field.name,
                    field.kind
                )));
            }
        }
        Ok(())
    }

    /// Validate the parameters and build the classifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when the parameters are inconsistent
    /// with each other or with the encoded design width.
    pub fn into_classifier(self) -> Result<Arc<dyn Classifier>, ModelError> {
        match self {
            Self::RandomForest { columns, trees } => {
                let encoder = DesignEncoder::new(columns)?;
                let forest = RandomForestClassifier::new(encoder, trees)?;
                Ok(Arc::new(forest))
            }
            Self::LogisticRegression {
                columns,
                coefficients,
                intercept,
            } => {
                let encoder = DesignEncoder::new(columns)?;
                let model = LogisticRegressionClassifier::new(encoder, coefficients, intercept)?;
                Ok(Arc::new(model))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
