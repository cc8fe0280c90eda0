//! Holdout metrics for binary classifiers

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LOG_LOSS_EPS: f64 = 1e-15;

/// Metrics computed on the validation split at training time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// `None` when the holdout contains a single class
    pub roc_auc: Option<f64>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub log_loss: f64,
    /// Root mean squared error of the probabilities (Brier score root)
    pub rmse: f64,
    pub threshold: f64,
    pub samples: usize,
}

impl EvaluationReport {
    pub fn compute(y_true: &[u8], scores: &[f64], threshold: f64) -> Result<Self> {
        if y_true.len() != scores.len() {
            return Err(PipelineError::InvalidTrainingData(format!(
                "{} labels but {} scores",
                y_true.len(),
                scores.len()
            )));
        }
        if y_true.is_empty() {
            return Err(PipelineError::InvalidTrainingData(
                "cannot evaluate on an empty holdout".to_string(),
            ));
        }

        Ok(Self {
            roc_auc: roc_auc(y_true, scores),
            accuracy: accuracy(y_true, scores, threshold),
            precision: precision(y_true, scores, threshold),
            recall: recall(y_true, scores, threshold),
            log_loss: log_loss(y_true, scores),
            rmse: rmse(y_true, scores),
            threshold,
            samples: y_true.len(),
        })
    }

    /// Flat name → value map, as recorded in the run registry
    pub fn to_metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        if let Some(auc) = self.roc_auc {
            metrics.insert("roc_auc".to_string(), auc);
        }
        metrics.insert("accuracy".to_string(), self.accuracy);
        metrics.insert("precision".to_string(), self.precision);
        metrics.insert("recall".to_string(), self.recall);
        metrics.insert("log_loss".to_string(), self.log_loss);
        metrics.insert("rmse".to_string(), self.rmse);
        metrics
    }
}

/// Area under the ROC curve via the rank-sum statistic, averaging ranks
/// over tied scores.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Option<f64> {
    let positives = y_true.iter().filter(|&&y| y == 1).count();
    let negatives = y_true.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block i..=j shares the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y_true[idx] == 1 {
                rank_sum += mean_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

fn confusion(y_true: &[u8], scores: &[f64], threshold: f64) -> (usize, usize, usize, usize) {
    let (mut tp, mut fp, mut tn, mut fn_) = (0, 0, 0, 0);
    for (&y, &s) in y_true.iter().zip(scores) {
        match (y == 1, s >= threshold) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (false, false) => tn += 1,
            (true, false) => fn_ += 1,
        }
    }
    (tp, fp, tn, fn_)
}

pub fn accuracy(y_true: &[u8], scores: &[f64], threshold: f64) -> f64 {
    let (tp, _, tn, _) = confusion(y_true, scores, threshold);
    ratio(tp + tn, y_true.len())
}

pub fn precision(y_true: &[u8], scores: &[f64], threshold: f64) -> f64 {
    let (tp, fp, _, _) = confusion(y_true, scores, threshold);
    ratio(tp, tp + fp)
}

pub fn recall(y_true: &[u8], scores: &[f64], threshold: f64) -> f64 {
    let (tp, _, _, fn_) = confusion(y_true, scores, threshold);
    ratio(tp, tp + fn_)
}

pub fn log_loss(y_true: &[u8], scores: &[f64]) -> f64 {
    let total: f64 = y_true
        .iter()
        .zip(scores)
        .map(|(&y, &s)| {
            let p = s.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
            if y == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / y_true.len().max(1) as f64
}

pub fn rmse(y_true: &[u8], scores: &[f64]) -> f64 {
    let sse: f64 = y_true
        .iter()
        .zip(scores)
        .map(|(&y, &s)| (s - y as f64).powi(2))
        .sum();
    (sse / y_true.len().max(1) as f64).sqrt()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y = [0, 0, 1, 1];
        assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
    }

    #[test]
    fn test_auc_ties_count_half() {
        assert_eq!(roc_auc(&[0, 1], &[0.5, 0.5]), Some(0.5));
        // one of four positive/negative pairs is tied, three are ordered
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.6, 0.6, 0.9]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class() {
        assert_eq!(roc_auc(&[1, 1], &[0.3, 0.4]), None);
    }

    #[test]
    fn test_threshold_metrics() {
        let y = [1, 1, 0, 0];
        let s = [0.9, 0.4, 0.6, 0.1];
        assert_eq!(accuracy(&y, &s, 0.5), 0.5);
        assert_eq!(precision(&y, &s, 0.5), 0.5);
        assert_eq!(recall(&y, &s, 0.5), 0.5);
        assert_eq!(recall(&y, &s, 0.95), 0.0);
        assert_eq!(precision(&y, &s, 0.95), 0.0);
    }

    #[test]
    fn test_log_loss_clips_extremes() {
        let loss = log_loss(&[1, 0], &[0.0, 1.0]);
        assert!(loss.is_finite());
        assert!(loss > 30.0);
        assert!(log_loss(&[1, 0], &[1.0, 0.0]) < 1e-12);
    }

    #[test]
    fn test_report() {
        let report = EvaluationReport::compute(&[0, 1, 1], &[0.2, 0.7, 0.4], 0.5).unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.roc_auc, Some(1.0));
        let metrics = report.to_metrics();
        assert!(metrics.contains_key("roc_auc"));
        assert!(metrics.contains_key("rmse"));

        assert!(EvaluationReport::compute(&[0], &[0.1, 0.2], 0.5).is_err());
        assert!(EvaluationReport::compute(&[], &[], 0.5).is_err());
    }
}
