//! Feature contract shared by training and serving.
//!
//! A [`FeatureSchema`] is derived once from the training columns and then
//! stored in the artifact bundle. Every record handed to the vectorizer,
//! at training time or at serving time, is shaped by the same schema:
//! categorical fields first, numerical fields second, each in a fixed
//! order.

use crate::dataset::{Dataset, RowRef};
use crate::error::{PipelineError, Result};
use crate::types::{FieldValue, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Storage type of a dataset column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    String,
}

/// Per-dataset classification options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaOptions {
    /// Target column, never a feature
    pub label: String,
    /// Identifier columns left out of the feature set
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Numeric columns that must be treated as categorical
    /// (boolean-like flags such as `has_credit_card`)
    #[serde(default)]
    pub categorical_overrides: Vec<String>,
}

/// Categorical/numerical field classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub label: String,
    pub categorical: Vec<String>,
    pub numerical: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
    /// Categorical fields backed by a numeric column (overrides); request
    /// values are rendered the way the training cells were
    #[serde(default)]
    pub numeric_categories: Vec<String>,
}

impl FeatureSchema {
    /// Classify dataset columns into categorical and numerical sets.
    ///
    /// String columns are categorical and numeric columns numerical, minus
    /// the label and the excluded columns. Overrides are appended to the
    /// categorical set in the order given.
    pub fn classify(columns: &[(String, ColumnType)], options: &SchemaOptions) -> Result<Self> {
        let has = |name: &str| columns.iter().any(|(c, _)| c == name);

        if !has(&options.label) {
            return Err(PipelineError::Schema(format!(
                "label column '{}' is absent from the dataset",
                options.label
            )));
        }

        for name in &options.categorical_overrides {
            if !has(name) {
                return Err(PipelineError::Schema(format!(
                    "categorical override '{}' is not a dataset column",
                    name
                )));
            }
            if *name == options.label || options.exclude.contains(name) {
                return Err(PipelineError::Schema(format!(
                    "categorical override '{}' is the label or an excluded column",
                    name
                )));
            }
        }

        let is_feature = |name: &String| *name != options.label && !options.exclude.contains(name);

        let mut categorical: Vec<String> = columns
            .iter()
            .filter(|(name, dtype)| *dtype == ColumnType::String && is_feature(name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &options.categorical_overrides {
            if !categorical.contains(name) {
                categorical.push(name.clone());
            }
        }

        let numerical: Vec<String> = columns
            .iter()
            .filter(|(name, dtype)| {
                *dtype == ColumnType::Numeric
                    && is_feature(name)
                    && !options.categorical_overrides.contains(name)
            })
            .map(|(name, _)| name.clone())
            .collect();

        if categorical.is_empty() && numerical.is_empty() {
            return Err(PipelineError::Schema(
                "no feature columns left after excluding label and identifiers".to_string(),
            ));
        }

        let excluded = options
            .exclude
            .iter()
            .filter(|name| has(name))
            .cloned()
            .collect();

        let numeric_categories = columns
            .iter()
            .filter(|(name, dtype)| {
                *dtype == ColumnType::Numeric && options.categorical_overrides.contains(name)
            })
            .map(|(name, _)| name.clone())
            .collect();

        Ok(Self {
            label: options.label.clone(),
            categorical,
            numerical,
            excluded,
            numeric_categories,
        })
    }

    /// Total number of schema fields
    pub fn field_count(&self) -> usize {
        self.categorical.len() + self.numerical.len()
    }

    /// Shape one dataset row into a record.
    ///
    /// Empty cells are left out of the record rather than zero-filled.
    pub fn to_record(&self, row: &RowRef<'_>) -> Record {
        let mut record = Record::with_capacity(self.field_count());
        for name in &self.categorical {
            if let Some(value) = row.get(name) {
                record.insert(name.as_str(), FieldValue::Text(value.to_category()));
            }
        }
        for name in &self.numerical {
            if let Some(number) = row.get(name).and_then(numeric_value) {
                record.insert(name.as_str(), FieldValue::Number(number));
            }
        }
        record
    }

    /// Shape every row of a dataset
    pub fn to_records(&self, dataset: &Dataset) -> Vec<Record> {
        dataset.iter_rows().map(|row| self.to_record(&row)).collect()
    }

    /// Validate a JSON request object against the schema.
    ///
    /// Unknown fields are dropped, nulls are treated as absent. Numerical
    /// fields accept numbers, numeric strings and booleans; anything else
    /// is an [`PipelineError::InvalidRecord`]. Numeric strings sent for a
    /// numeric-backed categorical field map to the same level as the number.
    pub fn conform(&self, input: &Map<String, Value>) -> Result<Record> {
        let mut record = Record::with_capacity(self.field_count());

        for name in &self.categorical {
            let category = match input.get(name) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) => match s.trim().parse::<f64>() {
                    Ok(f) if f.is_finite() && self.numeric_categories.contains(name) => {
                        FieldValue::Number(f).to_category()
                    }
                    _ => s.clone(),
                },
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(f) => FieldValue::Number(f).to_category(),
                    None => n.to_string(),
                },
                Some(Value::Bool(b)) => (if *b { "1" } else { "0" }).to_string(),
                Some(other) => {
                    return Err(PipelineError::InvalidRecord(format!(
                        "field '{}' must be a string or number, got {}",
                        name,
                        json_type(other)
                    )))
                }
            };
            record.insert(name.as_str(), FieldValue::Text(category));
        }

        for name in &self.numerical {
            let number = match input.get(name) {
                None | Some(Value::Null) => continue,
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
                Some(_) => None,
            };
            let number = number.filter(|n| n.is_finite()).ok_or_else(|| {
                PipelineError::InvalidRecord(format!("field '{}' must be numeric", name))
            })?;
            record.insert(name.as_str(), FieldValue::Number(number));
        }

        Ok(record)
    }
}

fn numeric_value(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) => Some(*n),
        FieldValue::Text(s) => s.parse().ok(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
