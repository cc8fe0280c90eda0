//! Record vectorizer.
//!
//! Learns a fixed vocabulary of vector positions from training records:
//! numeric fields own one slot named after the field, categorical fields
//! own one slot per value seen at fit time, named `field=value`. The
//! fitted [`VectorizerBinding`] is immutable and is what the artifact
//! bundle carries to the serving process.

use crate::error::{PipelineError, Result};
use crate::matrix::Matrix;
use crate::types::{FieldValue, Record};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Separator between field name and categorical value in feature names
pub const SEPARATOR: char = '=';

/// Ordered feature names plus their slot index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
struct Vocabulary {
    feature_names: Vec<String>,
    slots: HashMap<String, usize>,
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = String;

    fn try_from(feature_names: Vec<String>) -> std::result::Result<Self, Self::Error> {
        let mut slots = HashMap::with_capacity(feature_names.len());
        for (idx, name) in feature_names.iter().enumerate() {
            if slots.insert(name.clone(), idx).is_some() {
                return Err(format!("duplicate feature name '{}'", name));
            }
        }
        Ok(Self {
            feature_names,
            slots,
        })
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.feature_names
    }
}

fn slot_name(field: &str, value: &FieldValue) -> String {
    match value {
        FieldValue::Number(_) => field.to_string(),
        FieldValue::Text(s) => format!("{}{}{}", field, SEPARATOR, s),
    }
}

/// Vectorizer that has not necessarily been fitted yet
#[derive(Debug, Clone)]
pub struct DictVectorizer {
    sort: bool,
    vocabulary: Option<Vocabulary>,
}

impl DictVectorizer {
    /// Vectorizer that orders features lexicographically
    pub fn new() -> Self {
        Self {
            sort: true,
            vocabulary: None,
        }
    }

    /// Vectorizer that keeps first-seen feature order
    pub fn unsorted() -> Self {
        Self {
            sort: false,
            vocabulary: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.vocabulary.is_some()
    }

    /// Learn the vocabulary and return the fitted binding.
    ///
    /// Refitting replaces the previous vocabulary.
    pub fn fit(&mut self, records: &[Record]) -> Result<VectorizerBinding> {
        let mut feature_names = Vec::new();
        let mut seen = HashSet::new();

        for record in records {
            for (field, value) in record.iter() {
                let name = slot_name(field, value);
                if seen.insert(name.clone()) {
                    feature_names.push(name);
                }
            }
        }

        if feature_names.is_empty() {
            return Err(PipelineError::InvalidTrainingData(
                "no features found in training records".to_string(),
            ));
        }
        if self.sort {
            feature_names.sort();
        }

        let vocabulary =
            Vocabulary::try_from(feature_names).map_err(PipelineError::InvalidTrainingData)?;
        debug!(
            records = records.len(),
            features = vocabulary.feature_names.len(),
            "Vectorizer fitted"
        );
        self.vocabulary = Some(vocabulary.clone());
        Ok(VectorizerBinding { vocabulary })
    }

    /// Transform with the learned vocabulary
    pub fn transform(&self, record: &Record) -> Result<Vec<f64>> {
        let vocabulary = self
            .vocabulary
            .as_ref()
            .ok_or(PipelineError::NotFitted("vectorizer"))?;
        Ok(transform_with(vocabulary, record))
    }

    pub fn feature_names(&self) -> Result<&[String]> {
        self.vocabulary
            .as_ref()
            .map(|v| v.feature_names.as_slice())
            .ok_or(PipelineError::NotFitted("vectorizer"))
    }

    /// Immutable handle over the current vocabulary
    pub fn binding(&self) -> Result<VectorizerBinding> {
        self.vocabulary
            .clone()
            .map(|vocabulary| VectorizerBinding { vocabulary })
            .ok_or(PipelineError::NotFitted("vectorizer"))
    }
}

impl Default for DictVectorizer {
    fn default() -> Self {
        Self::new()
    }
}

fn transform_with(vocabulary: &Vocabulary, record: &Record) -> Vec<f64> {
    let mut vector = vec![0.0; vocabulary.feature_names.len()];
    for (field, value) in record.iter() {
        if let Some(&idx) = vocabulary.slots.get(&slot_name(field, value)) {
            vector[idx] = match value {
                FieldValue::Number(n) => *n,
                FieldValue::Text(_) => 1.0,
            };
        }
    }
    vector
}

/// Fitted, read-only record -> vector mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerBinding {
    vocabulary: Vocabulary,
}

impl VectorizerBinding {
    /// Map a record into the fitted vector space.
    ///
    /// Unknown fields and unseen categorical values contribute nothing.
    pub fn transform(&self, record: &Record) -> Vec<f64> {
        transform_with(&self.vocabulary, record)
    }

    pub fn transform_batch(&self, records: &[Record]) -> Result<Matrix> {
        let mut matrix = Matrix::with_cols(self.len());
        for record in records {
            matrix.push_row(&self.transform(record))?;
        }
        Ok(matrix)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.vocabulary.feature_names
    }

    /// Output vector length
    pub fn len(&self) -> usize {
        self.vocabulary.feature_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.feature_names.is_empty()
    }
}
