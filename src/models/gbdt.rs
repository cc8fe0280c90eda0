//! Gradient-boosted decision trees with a logistic objective.
//!
//! Each round fits one regression tree to the first and second order
//! gradients of the log loss. Leaf weights are `-G / (H + lambda)` scaled
//! by the learning rate, and a split is only kept when both children carry
//! at least `min_child_weight` hessian mass.

use crate::error::{PipelineError, Result};
use crate::matrix::Matrix;
use crate::models::classifier::{check_training_data, sigmoid, Classifier};
use crate::models::tree::{Criterion, GrowParams, Tree, TreeGrower};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    /// Learning rate applied to every leaf weight
    pub eta: f64,
    pub max_depth: usize,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    /// Fraction of features sampled for each tree
    pub colsample_bytree: f64,
    pub num_boost_round: usize,
    /// L2 regularisation on leaf weights
    pub lambda: f64,
    /// Initial probability before any tree is added
    pub base_score: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            eta: 0.05,
            max_depth: 4,
            min_child_weight: 10.0,
            colsample_bytree: 0.7,
            num_boost_round: 155,
            lambda: 1.0,
            base_score: 0.5,
            seed: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BoostedState {
    n_features: usize,
    base_margin: f64,
    trees: Vec<Tree>,
}

/// Gradient-boosted tree classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: BoostingParams,
    state: Option<BoostedState>,
}

struct LogisticGradients<'a> {
    grad: &'a [f64],
    hess: &'a [f64],
    lambda: f64,
    min_child_weight: f64,
    eta: f64,
}

impl Criterion for LogisticGradients<'_> {
    /// (sum of gradients, sum of hessians)
    type Stats = (f64, f64);

    fn sample_stats(&self, sample: usize) -> (f64, f64) {
        (self.grad[sample], self.hess[sample])
    }

    fn add(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
        (a.0 + b.0, a.1 + b.1)
    }

    fn sub(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
        (a.0 - b.0, a.1 - b.1)
    }

    fn score(&self, stats: &(f64, f64)) -> f64 {
        stats.0 * stats.0 / (stats.1 + self.lambda)
    }

    fn admissible(&self, left: &(f64, f64), right: &(f64, f64)) -> bool {
        left.1 >= self.min_child_weight && right.1 >= self.min_child_weight
    }

    fn leaf_value(&self, stats: &(f64, f64)) -> f64 {
        -stats.0 / (stats.1 + self.lambda) * self.eta
    }
}

impl GradientBoostedTrees {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            state: None,
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn tree_count(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.trees.len())
    }

    fn margin(state: &BoostedState, x: &[f64]) -> f64 {
        state.base_margin + state.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        let Some(state) = &self.state else {
            return Err("gradient boosting model is not fitted".to_string());
        };
        if !state.base_margin.is_finite() {
            return Err("base margin is not finite".to_string());
        }
        for (i, tree) in state.trees.iter().enumerate() {
            tree.validate(state.n_features)
                .map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

impl Default for GradientBoostedTrees {
    fn default() -> Self {
        Self::new(BoostingParams::default())
    }
}

impl Classifier for GradientBoostedTrees {
    fn fit(&mut self, x: &Matrix, y: &[u8]) -> Result<()> {
        check_training_data(x, y)?;
        let p = &self.params;
        if !(p.base_score > 0.0 && p.base_score < 1.0) {
            return Err(PipelineError::InvalidTrainingData(format!(
                "base_score must be in (0, 1), got {}",
                p.base_score
            )));
        }

        let n = x.n_rows();
        let n_features = x.n_cols();
        let n_sampled =
            ((n_features as f64 * p.colsample_bytree).round() as usize).clamp(1, n_features);
        let base_margin = (p.base_score / (1.0 - p.base_score)).ln();
        let grow = GrowParams {
            max_depth: p.max_depth,
            min_samples_split: 2,
            min_gain: 1e-12,
        };

        info!(
            rows = n,
            features = n_features,
            rounds = p.num_boost_round,
            eta = p.eta,
            max_depth = p.max_depth,
            "Fitting gradient-boosted trees"
        );

        let mut rng = ChaCha8Rng::seed_from_u64(p.seed);
        let mut margins = vec![base_margin; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut trees = Vec::with_capacity(p.num_boost_round);

        for round in 0..p.num_boost_round {
            for i in 0..n {
                let prob = sigmoid(margins[i]);
                grad[i] = prob - y[i] as f64;
                hess[i] = (prob * (1.0 - prob)).max(1e-16);
            }

            let mut features: Vec<usize> = sample(&mut rng, n_features, n_sampled).into_vec();
            features.sort_unstable();

            let criterion = LogisticGradients {
                grad: &grad,
                hess: &hess,
                lambda: p.lambda,
                min_child_weight: p.min_child_weight,
                eta: p.eta,
            };
            let tree = TreeGrower::new(x, &criterion, &grow, || features.clone())
                .grow((0..n).collect());

            for (i, margin) in margins.iter_mut().enumerate() {
                *margin += tree.predict(x.row(i));
            }
            if round % 25 == 0 {
                debug!(round, leaves = tree.leaf_count(), "Boosting round complete");
            }
            trees.push(tree);
        }

        self.state = Some(BoostedState {
            n_features,
            base_margin,
            trees,
        });
        Ok(())
    }

    fn predict_proba(&self, x: &[f64]) -> Result<f64> {
        let state = self
            .state
            .as_ref()
            .ok_or(PipelineError::NotFitted("gradient boosting model"))?;
        if x.len() != state.n_features {
            return Err(PipelineError::DimensionMismatch {
                expected: state.n_features,
                actual: x.len(),
            });
        }
        Ok(sigmoid(Self::margin(state, x)))
    }

    fn n_features(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.n_features)
    }

    fn name(&self) -> &'static str {
        "gradient_boosting"
    }
}
