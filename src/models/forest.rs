//! Random forest classifier.
//!
//! Every tree is grown on a bootstrap sample of the rows with gini
//! impurity, considering a random subset of `max_features` columns at each
//! split. Leaves store the positive fraction of their samples and the
//! forest averages them.

use crate::error::{PipelineError, Result};
use crate::matrix::Matrix;
use crate::models::classifier::{check_training_data, Classifier};
use crate::models::tree::{Criterion, GrowParams, Tree, TreeGrower};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Columns considered per split; `None` uses `sqrt(n_features)`
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 170,
            max_depth: 36,
            min_samples_split: 2,
            max_features: None,
            bootstrap: true,
            seed: 11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ForestState {
    n_features: usize,
    trees: Vec<Tree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    state: Option<ForestState>,
}

/// Gini impurity over (sample count, positive count)
struct Gini<'a> {
    y: &'a [u8],
}

impl Criterion for Gini<'_> {
    type Stats = (f64, f64);

    fn sample_stats(&self, sample: usize) -> (f64, f64) {
        (1.0, self.y[sample] as f64)
    }

    fn add(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
        (a.0 + b.0, a.1 + b.1)
    }

    fn sub(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
        (a.0 - b.0, a.1 - b.1)
    }

    /// Negative weighted impurity `-n * gini`
    fn score(&self, stats: &(f64, f64)) -> f64 {
        let (n, pos) = *stats;
        if n <= 0.0 {
            return 0.0;
        }
        let p = pos / n;
        -n * 2.0 * p * (1.0 - p)
    }

    fn admissible(&self, left: &(f64, f64), right: &(f64, f64)) -> bool {
        left.0 >= 1.0 && right.0 >= 1.0
    }

    fn leaf_value(&self, stats: &(f64, f64)) -> f64 {
        if stats.0 > 0.0 {
            stats.1 / stats.0
        } else {
            0.0
        }
    }
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            state: None,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn tree_count(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.trees.len())
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        let Some(state) = &self.state else {
            return Err("random forest is not fitted".to_string());
        };
        if state.trees.is_empty() {
            return Err("random forest has no trees".to_string());
        }
        for (i, tree) in state.trees.iter().enumerate() {
            tree.validate(state.n_features)
                .map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(ForestParams::default())
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Matrix, y: &[u8]) -> Result<()> {
        check_training_data(x, y)?;
        let p = &self.params;
        if p.n_estimators == 0 {
            return Err(PipelineError::InvalidTrainingData(
                "n_estimators must be at least 1".to_string(),
            ));
        }

        let n = x.n_rows();
        let n_features = x.n_cols();
        let max_features = p
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt() as usize)
            .clamp(1, n_features);
        let grow = GrowParams {
            max_depth: p.max_depth,
            min_samples_split: p.min_samples_split.max(2),
            min_gain: 1e-12,
        };

        info!(
            rows = n,
            features = n_features,
            trees = p.n_estimators,
            max_depth = p.max_depth,
            max_features,
            "Fitting random forest"
        );

        let criterion = Gini { y };
        let mut rng = ChaCha8Rng::seed_from_u64(p.seed);
        let mut trees = Vec::with_capacity(p.n_estimators);

        for t in 0..p.n_estimators {
            let rows: Vec<usize> = if p.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let tree = TreeGrower::new(x, &criterion, &grow, || {
                sample(&mut rng, n_features, max_features).into_vec()
            })
            .grow(rows);

            if t % 25 == 0 {
                debug!(tree = t, nodes = tree.node_count(), "Tree grown");
            }
            trees.push(tree);
        }

        self.state = Some(ForestState { n_features, trees });
        Ok(())
    }

    fn predict_proba(&self, x: &[f64]) -> Result<f64> {
        let state = self
            .state
            .as_ref()
            .ok_or(PipelineError::NotFitted("random forest"))?;
        if x.len() != state.n_features {
            return Err(PipelineError::DimensionMismatch {
                expected: state.n_features,
                actual: x.len(),
            });
        }
        let total: f64 = state.trees.iter().map(|t| t.predict(x)).sum();
        Ok((total / state.trees.len() as f64).clamp(0.0, 1.0))
    }

    fn n_features(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.n_features)
    }

    fn name(&self) -> &'static str {
        "random_forest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classifier::tests::separable_problem;

    fn small_forest() -> RandomForest {
        RandomForest::new(ForestParams {
            n_estimators: 15,
            max_depth: 6,
            max_features: Some(2),
            ..ForestParams::default()
        })
    }

    #[test]
    fn test_learns_separable_problem() {
        let (x, y) = separable_problem();
        let mut forest = small_forest();
        forest.fit(&x, &y).unwrap();

        assert_eq!(forest.tree_count(), 15);
        assert!(forest.predict_proba(&[0.95, 3.0]).unwrap() > 0.8);
        assert!(forest.predict_proba(&[0.05, 3.0]).unwrap() < 0.2);
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let (x, y) = separable_problem();
        let mut a = small_forest();
        let mut b = small_forest();
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_estimators_rejected() {
        let (x, y) = separable_problem();
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 0,
            ..ForestParams::default()
        });
        assert!(forest.fit(&x, &y).is_err());
    }

    #[test]
    fn test_unfitted_forest_fails_validation() {
        assert!(RandomForest::default().validate().is_err());
        assert!(matches!(
            RandomForest::default().predict_proba(&[1.0]),
            Err(PipelineError::NotFitted(_))
        ));
    }
}
