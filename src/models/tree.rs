//! Binary decision trees shared by the tree ensembles.
//!
//! Trees are stored as a flat node array. A split sends a sample left when
//! `x[feature] < threshold`. Growing is exact: candidate thresholds are the
//! midpoints between consecutive distinct feature values of the samples
//! reaching a node.

use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Structural check for trees read back from disk.
    ///
    /// Children must point forward inside the node array, split features
    /// must exist in the input space and every stored number must be finite.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("leaf {} has a non-finite value", idx));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if !threshold.is_finite() {
                        return Err(format!("node {} has a non-finite threshold", idx));
                    }
                    if *feature >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} of {}",
                            idx, feature, n_features
                        ));
                    }
                    let in_range = |child: usize| child > idx && child < self.nodes.len();
                    if !in_range(*left) || !in_range(*right) {
                        return Err(format!("node {} has an invalid child index", idx));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Per-node sufficient statistics and scoring for a split criterion
pub(crate) trait Criterion {
    type Stats: Copy + Default;

    fn sample_stats(&self, sample: usize) -> Self::Stats;
    fn add(a: Self::Stats, b: Self::Stats) -> Self::Stats;
    fn sub(a: Self::Stats, b: Self::Stats) -> Self::Stats;
    /// Node score; split gain is `score(left) + score(right) - score(parent)`
    fn score(&self, stats: &Self::Stats) -> f64;
    fn admissible(&self, left: &Self::Stats, right: &Self::Stats) -> bool;
    fn leaf_value(&self, stats: &Self::Stats) -> f64;
}

pub(crate) struct GrowParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_gain: f64,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

pub(crate) struct TreeGrower<'a, C: Criterion, F: FnMut() -> Vec<usize>> {
    x: &'a Matrix,
    criterion: &'a C,
    params: &'a GrowParams,
    candidate_features: F,
    nodes: Vec<Node>,
}

impl<'a, C: Criterion, F: FnMut() -> Vec<usize>> TreeGrower<'a, C, F> {
    /// `candidate_features` is called once per split search.
    pub fn new(
        x: &'a Matrix,
        criterion: &'a C,
        params: &'a GrowParams,
        candidate_features: F,
    ) -> Self {
        Self {
            x,
            criterion,
            params,
            candidate_features,
            nodes: Vec::new(),
        }
    }

    pub fn grow(mut self, samples: Vec<usize>) -> Tree {
        self.build(samples, 0);
        Tree { nodes: self.nodes }
    }

    fn node_stats(&self, samples: &[usize]) -> C::Stats {
        samples.iter().fold(C::Stats::default(), |acc, &s| {
            C::add(acc, self.criterion.sample_stats(s))
        })
    }

    fn build(&mut self, mut samples: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let stats = self.node_stats(&samples);
        self.nodes.push(Node::Leaf {
            value: self.criterion.leaf_value(&stats),
        });

        if depth >= self.params.max_depth || samples.len() < self.params.min_samples_split {
            return idx;
        }

        let Some(split) = self.find_split(&mut samples, &stats) else {
            return idx;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&s| self.x.get(s, split.feature) < split.threshold);

        let left = self.build(left_samples, depth + 1);
        let right = self.build(right_samples, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn find_split(&mut self, samples: &mut [usize], parent: &C::Stats) -> Option<BestSplit> {
        if samples.len() < 2 {
            return None;
        }
        let parent_score = self.criterion.score(parent);
        let mut best: Option<BestSplit> = None;

        for feature in (self.candidate_features)() {
            let x = self.x;
            samples.sort_by(|&a, &b| x.get(a, feature).total_cmp(&x.get(b, feature)));

            let mut left = C::Stats::default();
            for pos in 0..samples.len() - 1 {
                left = C::add(left, self.criterion.sample_stats(samples[pos]));
                let here = x.get(samples[pos], feature);
                let next = x.get(samples[pos + 1], feature);
                let threshold = here + (next - here) / 2.0;
                if here == next || !threshold.is_finite() {
                    continue;
                }
                let right = C::sub(*parent, left);
                if !self.criterion.admissible(&left, &right) {
                    continue;
                }
                let gain =
                    self.criterion.score(&left) + self.criterion.score(&right) - parent_score;
                if gain > self.params.min_gain && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}
