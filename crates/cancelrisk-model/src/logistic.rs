//! Logistic regression classifier.

use cancelrisk_core::{Classifier, FeatureRow, InferenceError, ModelInfo};

use crate::encoding::DesignEncoder;
use crate::ModelError;

/// Linear model with a sigmoid link.
///
/// The class boundary is the sign of the decision function, which is the
/// same as a 0.5 probability cut-off.
#[derive(Debug, Clone)]
pub struct LogisticRegressionClassifier {
    encoder: DesignEncoder,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LogisticRegressionClassifier {
    /// Build the classifier, checking one finite coefficient per design slot.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] on a width mismatch or non-finite
    /// parameter.
    pub fn new(
        encoder: DesignEncoder,
        coefficients: Vec<f64>,
        intercept: f64,
    ) -> Result<Self, ModelError> {
        if coefficients.len() != encoder.width() {
            return Err(ModelError::Invalid(format!(
                "{} coefficients for a design of width {}",
                coefficients.len(),
                encoder.width()
            )));
        }
        if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::Invalid(
                "logistic regression parameters must be finite".to_string(),
            ));
        }
        Ok(Self {
            encoder,
            coefficients,
            intercept,
        })
    }

    fn decision_function(&self, row: &FeatureRow) -> Result<f64, InferenceError> {
        let design = self.encoder.encode(row)?;
        let z = design
            .iter()
            .zip(&self.coefficients)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.intercept;
        // Design values are finite, so NaN here means opposing terms overflowed.
        if z.is_nan() {
            return Err(InferenceError::InvalidInput(
                "Input contains infinity or a value too large for the decision function"
                    .to_string(),
            ));
        }
        Ok(z)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Classifier for LogisticRegressionClassifier {
    fn classify(&self, row: &FeatureRow) -> Result<u8, InferenceError> {
        Ok(u8::from(self.decision_function(row)? > 0.0))
    }

    fn score_probability(&self, row: &FeatureRow) -> Result<f64, InferenceError> {
        self.decision_function(row).map(sigmoid)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            model_type: "logistic_regression".to_string(),
            columns: self.encoder.columns().iter().map(|c| c.as_field()).collect(),
            estimators: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactColumn;
    use cancelrisk_core::{FeatureField, FeatureSchema, SchemaVersion};
    use serde_json::{json, Value};

    fn model() -> LogisticRegressionClassifier {
        let encoder = DesignEncoder::new(vec![
            ArtifactColumn::Categorical {
                name: "cat__canal_presencial".to_string(),
                categories: vec![json!(0), json!(1)],
            },
            ArtifactColumn::Numeric {
                name: "num__dias_anticipacion".to_string(),
            },
        ])
        .unwrap();
        LogisticRegressionClassifier::new(encoder, vec![0.0, 2.0, -0.5], 0.0).unwrap()
    }

    fn row(flag: Value, dias: Value) -> FeatureRow {
        let schema = FeatureSchema::new(
            SchemaVersion::Custom,
            vec![
                FeatureField::categorical("cat__canal_presencial"),
                FeatureField::numeric("num__dias_anticipacion"),
            ],
        )
        .unwrap();
        let body = json!({"cat__canal_presencial": flag, "num__dias_anticipacion": dias});
        FeatureRow::assemble(&schema, body.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_zero_margin_is_half_and_class_zero() {
        let m = model();
        let r = row(json!(0), json!(0));
        assert!((m.score_probability(&r).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(m.classify(&r).unwrap(), 0);
    }

    #[test]
    fn test_positive_margin() {
        let m = model();
        let r = row(json!(1), json!(1));
        // z = 2.0 - 0.5
        let p = m.score_probability(&r).unwrap();
        assert!((p - sigmoid(1.5)).abs() < 1e-12);
        assert!(p > 0.5 && p < 1.0);
        assert_eq!(m.classify(&r).unwrap(), 1);
    }

    #[test]
    fn test_extreme_margin_stays_in_unit_interval() {
        let m = model();
        let p = m.score_probability(&row(json!(0), json!(1e6))).unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_overflowing_margin_is_invalid_input() {
        let encoder = DesignEncoder::new(vec![
            ArtifactColumn::Numeric {
                name: "num__a".to_string(),
            },
            ArtifactColumn::Numeric {
                name: "num__b".to_string(),
            },
        ])
        .unwrap();
        let m = LogisticRegressionClassifier::new(encoder, vec![10.0, -10.0], 0.0).unwrap();
        let schema = FeatureSchema::new(
            SchemaVersion::Custom,
            vec![FeatureField::numeric("num__a"), FeatureField::numeric("num__b")],
        )
        .unwrap();
        let body = json!({"num__a": 1e308, "num__b": 1e308});
        let r = FeatureRow::assemble(&schema, body.as_object().unwrap()).unwrap();

        assert!(matches!(
            m.score_probability(&r),
            Err(InferenceError::InvalidInput(_))
        ));
        assert!(matches!(m.classify(&r), Err(InferenceError::InvalidInput(_))));
    }

    #[test]
    fn test_huge_margin_saturates() {
        let m = model();
        let p = m.score_probability(&row(json!(0), json!(-1e308))).unwrap();
        assert_eq!(p, 1.0);
    }

    #[test]
    fn test_rejects_non_finite_parameters() {
        let encoder = DesignEncoder::new(vec![ArtifactColumn::Numeric {
            name: "x".to_string(),
        }])
        .unwrap();
        assert!(LogisticRegressionClassifier::new(encoder.clone(), vec![f64::NAN], 0.0).is_err());
        assert!(LogisticRegressionClassifier::new(encoder, vec![1.0], f64::INFINITY).is_err());
    }
}
