//! Row-to-design-vector encoding.
//!
//! Turns a [`FeatureRow`] of raw JSON values into the dense `f64` vector the
//! fitted parameters index into. Numeric columns take one slot each;
//! categorical columns are one-hot encoded against their training
//! vocabulary. This is where value type errors surface.

use cancelrisk_core::{FeatureRow, InferenceError};
use serde_json::Value;

use crate::artifact::ArtifactColumn;
use crate::ModelError;

/// Encoder built from an artifact's column list.
#[derive(Debug, Clone)]
pub struct DesignEncoder {
    columns: Vec<ArtifactColumn>,
    width: usize,
}

impl DesignEncoder {
    /// Validate the column list and compute the design width.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] for an empty column list, an empty or
    /// duplicated category vocabulary, or a non-scalar category.
    pub fn new(columns: Vec<ArtifactColumn>) -> Result<Self, ModelError> {
        if columns.is_empty() {
            return Err(ModelError::Invalid("artifact declares no columns".to_string()));
        }
        for column in &columns {
            if let ArtifactColumn::Categorical { name, categories } = column {
                if categories.is_empty() {
                    return Err(ModelError::Invalid(format!(
                        "categorical column {name} has no categories"
                    )));
                }
                for (i, category) in categories.iter().enumerate() {
                    if !matches!(category, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                        return Err(ModelError::Invalid(format!(
                            "categorical column {name} has non-scalar category {category}"
                        )));
                    }
                    if categories[..i].iter().any(|c| category_matches(c, category)) {
                        return Err(ModelError::Invalid(format!(
                            "categorical column {name} lists category {category} twice"
                        )));
                    }
                }
            }
        }
        let width = columns.iter().map(ArtifactColumn::width).sum();
        Ok(Self { columns, width })
    }

    /// Length of the encoded vector.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Artifact columns in training order.
    pub fn columns(&self) -> &[ArtifactColumn] {
        &self.columns
    }

    /// Encode `row`.
    ///
    /// # Errors
    ///
    /// [`InferenceError::InvalidInput`] for values that do not fit their
    /// column; [`InferenceError::Internal`] if the row's columns are not the
    /// artifact's columns.
    pub fn encode(&self, row: &FeatureRow) -> Result<Vec<f64>, InferenceError> {
        if row.len() != self.columns.len() {
            return Err(InferenceError::Internal(format!(
                "row has {} columns, model expects {}",
                row.len(),
                self.columns.len()
            )));
        }

        let mut design = Vec::with_capacity(self.width);
        for ((name, value), column) in row.columns().iter().zip(&self.columns) {
            if name != column.name() {
                return Err(InferenceError::Internal(format!(
                    "row column {name} where model expects {}",
                    column.name()
                )));
            }
            match column {
                ArtifactColumn::Numeric { .. } => design.push(coerce_numeric(name, value)?),
                ArtifactColumn::Categorical { categories, .. } => {
                    let hot = categories
                        .iter()
                        .position(|c| category_matches(c, value))
                        .ok_or_else(|| {
                            InferenceError::InvalidInput(format!(
                                "Found unknown category {value} in column {name} during transform"
                            ))
                        })?;
                    design.extend((0..categories.len()).map(|i| if i == hot { 1.0 } else { 0.0 }));
                }
            }
        }
        Ok(design)
    }
}

/// Coerce a raw request value to a float.
///
/// Numbers pass through, booleans become 1/0, strings are parsed after
/// trimming. `null`, NaN, infinities and nested values are rejected.
pub fn coerce_numeric(column: &str, value: &Value) -> Result<f64, InferenceError> {
    let number = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            InferenceError::InvalidInput(format!("could not convert {n} to float"))
        })?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            InferenceError::InvalidInput(format!("could not convert string to float: '{s}'"))
        })?,
        Value::Null => {
            return Err(InferenceError::InvalidInput(format!(
                "Input contains NaN (column {column})"
            )))
        }
        Value::Array(_) | Value::Object(_) => {
            return Err(InferenceError::InvalidInput(format!(
                "setting an array element with a sequence (column {column})"
            )))
        }
    };

    if number.is_nan() {
        Err(InferenceError::InvalidInput(format!(
            "Input contains NaN (column {column})"
        )))
    } else if number.is_infinite() {
        Err(InferenceError::InvalidInput(format!(
            "Input contains infinity or a value too large (column {column})"
        )))
    } else {
        Ok(number)
    }
}

/// Category equality: numbers compare by value, strings and booleans exactly.
fn category_matches(category: &Value, value: &Value) -> bool {
    match (category, value) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cancelrisk_core::{FeatureField, FeatureSchema, SchemaVersion};
    use serde_json::json;

    fn channel_columns() -> Vec<ArtifactColumn> {
        vec![
            ArtifactColumn::Categorical {
                name: "cat__canal".to_string(),
                categories: vec![json!("web"), json!("tienda")],
            },
            ArtifactColumn::Numeric {
                name: "num__monto".to_string(),
            },
        ]
    }

    fn channel_schema() -> FeatureSchema {
        FeatureSchema::new(
            SchemaVersion::Custom,
            vec![
                FeatureField::categorical("cat__canal"),
                FeatureField::numeric("num__monto"),
            ],
        )
        .unwrap()
    }

    fn row(canal: Value, monto: Value) -> FeatureRow {
        let body = json!({"cat__canal": canal, "num__monto": monto});
        FeatureRow::assemble(&channel_schema(), body.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_width_counts_one_hot_slots() {
        let encoder = DesignEncoder::new(channel_columns()).unwrap();
        assert_eq!(encoder.width(), 3);
    }

    #[test]
    fn test_encode_one_hot_and_numeric() {
        let encoder = DesignEncoder::new(channel_columns()).unwrap();
        let design = encoder.encode(&row(json!("tienda"), json!(12.5))).unwrap();
        assert_eq!(design, vec![0.0, 1.0, 12.5]);
    }

    #[test]
    fn test_numeric_strings_and_booleans_are_coerced() {
        assert_eq!(coerce_numeric("c", &json!(" 3.5 ")).unwrap(), 3.5);
        assert_eq!(coerce_numeric("c", &json!(true)).unwrap(), 1.0);
        assert_eq!(coerce_numeric("c", &json!(7)).unwrap(), 7.0);
    }

    #[test]
    fn test_non_numeric_values_are_invalid_input() {
        let err = coerce_numeric("num__total_a_pagar", &json!("abc")).unwrap_err();
        assert_eq!(
            err,
            InferenceError::InvalidInput("could not convert string to float: 'abc'".to_string())
        );
        assert!(matches!(
            coerce_numeric("c", &Value::Null),
            Err(InferenceError::InvalidInput(_))
        ));
        assert!(matches!(
            coerce_numeric("c", &json!([1, 2])),
            Err(InferenceError::InvalidInput(_))
        ));
        assert!(matches!(
            coerce_numeric("c", &json!("NaN")),
            Err(InferenceError::InvalidInput(_))
        ));
        assert!(matches!(
            coerce_numeric("c", &json!("inf")),
            Err(InferenceError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_category_is_invalid_input() {
        let encoder = DesignEncoder::new(channel_columns()).unwrap();
        let err = encoder.encode(&row(json!("app"), json!(1))).unwrap_err();
        match err {
            InferenceError::InvalidInput(msg) => assert!(msg.contains("cat__canal")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_numeric_categories_match_by_value() {
        let encoder = DesignEncoder::new(vec![ArtifactColumn::Categorical {
            name: "cat__flag".to_string(),
            categories: vec![json!(0), json!(1)],
        }])
        .unwrap();
        let schema = FeatureSchema::new(
            SchemaVersion::Custom,
            vec![FeatureField::categorical("cat__flag")],
        )
        .unwrap();
        let body = json!({"cat__flag": 1.0});
        let row = FeatureRow::assemble(&schema, body.as_object().unwrap()).unwrap();
        assert_eq!(encoder.encode(&row).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_invalid_vocabularies_are_rejected() {
        let empty = vec![ArtifactColumn::Categorical {
            name: "c".to_string(),
            categories: Vec::new(),
        }];
        assert!(DesignEncoder::new(empty).is_err());

        let duplicated = vec![ArtifactColumn::Categorical {
            name: "c".to_string(),
            categories: vec![json!("a"), json!("a")],
        }];
        assert!(DesignEncoder::new(duplicated).is_err());

        let nested = vec![ArtifactColumn::Categorical {
            name: "c".to_string(),
            categories: vec![json!(["a"])],
        }];
        assert!(DesignEncoder::new(nested).is_err());

        assert!(DesignEncoder::new(Vec::new()).is_err());
    }

    #[test]
    fn test_row_from_other_schema_is_internal_error() {
        let encoder = DesignEncoder::new(channel_columns()).unwrap();
        let other = FeatureSchema::new(
            SchemaVersion::Custom,
            vec![
                FeatureField::categorical("cat__otro"),
                FeatureField::numeric("num__monto"),
            ],
        )
        .unwrap();
        let body = json!({"cat__otro": "web", "num__monto": 1});
        let row = FeatureRow::assemble(&other, body.as_object().unwrap()).unwrap();
        assert!(matches!(
            encoder.encode(&row),
            Err(InferenceError::Internal(_))
        ));
    }
}
