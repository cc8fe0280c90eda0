//! Classifier contract and the swappable model wrapper

use crate::error::{PipelineError, Result};
use crate::matrix::Matrix;
use crate::models::forest::{ForestParams, RandomForest};
use crate::models::gbdt::{BoostingParams, GradientBoostedTrees};
use serde::{Deserialize, Serialize};

/// Binary classifier over a fixed-length numeric feature space.
///
/// The decision threshold is not part of the model; callers apply their
/// own to the probability from [`Classifier::predict_proba`].
pub trait Classifier {
    /// Fit on rows of `x` with labels in {0, 1}
    fn fit(&mut self, x: &Matrix, y: &[u8]) -> Result<()>;

    /// Positive-class probability for one feature vector
    fn predict_proba(&self, x: &[f64]) -> Result<f64>;

    /// Input dimension learned at fit time, `None` before fitting
    fn n_features(&self) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// Hyperparameters for each supported algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ModelParams {
    GradientBoosting(BoostingParams),
    RandomForest(ForestParams),
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams::GradientBoosting(BoostingParams::default())
    }
}

/// Model stored in an artifact bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Model {
    GradientBoosting(GradientBoostedTrees),
    RandomForest(RandomForest),
}

impl Model {
    /// Unfitted model for the given hyperparameters
    pub fn from_params(params: &ModelParams) -> Self {
        match params {
            ModelParams::GradientBoosting(p) => {
                Model::GradientBoosting(GradientBoostedTrees::new(p.clone()))
            }
            ModelParams::RandomForest(p) => Model::RandomForest(RandomForest::new(p.clone())),
        }
    }

    pub fn hyperparameters(&self) -> ModelParams {
        match self {
            Model::GradientBoosting(m) => ModelParams::GradientBoosting(m.params().clone()),
            Model::RandomForest(m) => ModelParams::RandomForest(m.params().clone()),
        }
    }

    /// Structural consistency of a deserialized model
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Model::GradientBoosting(m) => m.validate(),
            Model::RandomForest(m) => m.validate(),
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Model::GradientBoosting(m) => m,
            Model::RandomForest(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Model::GradientBoosting(m) => m,
            Model::RandomForest(m) => m,
        }
    }
}

impl Classifier for Model {
    fn fit(&mut self, x: &Matrix, y: &[u8]) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: &[f64]) -> Result<f64> {
        self.inner().predict_proba(x)
    }

    fn n_features(&self) -> Option<usize> {
        self.inner().n_features()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}

#[inline]
pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Shared input checks for `fit`
pub(crate) fn check_training_data(x: &Matrix, y: &[u8]) -> Result<()> {
    if x.is_empty() || x.n_cols() == 0 {
        return Err(PipelineError::InvalidTrainingData(
            "feature matrix is empty".to_string(),
        ));
    }
    if x.n_rows() != y.len() {
        return Err(PipelineError::InvalidTrainingData(format!(
            "{} feature rows but {} labels",
            x.n_rows(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|&&label| label > 1) {
        return Err(PipelineError::InvalidTrainingData(format!(
            "labels must be 0 or 1, found {}",
            bad
        )));
    }
    Ok(())
}
