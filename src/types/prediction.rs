//! Prediction and decision data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from probability and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Configurable risk level thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.5,
            high: 0.7,
            critical: 0.9,
        }
    }
}

/// Raw model output for one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Positive-class probability in [0, 1]
    pub probability: f64,
}

impl Prediction {
    /// Apply a caller-chosen decision threshold
    pub fn label(&self, threshold: f64) -> bool {
        self.probability >= threshold
    }
}

/// Decision returned to serving clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier
    pub prediction_id: String,

    /// Echo of the request's identifier field, when configured and present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Thresholded label (fraud / churn)
    pub label: bool,

    /// Positive-class probability (0.0 - 1.0)
    pub probability: f64,

    /// Threshold that produced `label`
    pub threshold: f64,

    /// Risk level classification
    pub risk_level: RiskLevel,

    /// Run id of the bundle that scored the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(prediction: Prediction, threshold: f64, thresholds: &RiskLevelThresholds) -> Self {
        Self {
            prediction_id: uuid::Uuid::new_v4().to_string(),
            record_id: None,
            label: prediction.label(threshold),
            probability: prediction.probability,
            threshold,
            risk_level: RiskLevel::from_score(prediction.probability, thresholds),
            model_version: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_record_id(mut self, record_id: Option<String>) -> Self {
        self.record_id = record_id;
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskLevelThresholds::default();

        assert_eq!(RiskLevel::from_score(0.1, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.5, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.75, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.95, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn test_threshold_is_caller_supplied() {
        let prediction = Prediction { probability: 0.42 };
        assert!(!prediction.label(0.5));
        assert!(prediction.label(0.4));
    }

    #[test]
    fn test_decision_serialization() {
        let decision = Decision::new(
            Prediction { probability: 0.78 },
            0.5,
            &RiskLevelThresholds::default(),
        )
        .with_record_id(Some("15634602".to_string()))
        .with_model_version("run-1");

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["label"], true);
        assert_eq!(json["risk_level"], "high");
        assert_eq!(json["record_id"], "15634602");
        assert_eq!(json["model_version"], "run-1");
    }
}
