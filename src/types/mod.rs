//! Type definitions shared by training and serving

pub mod prediction;
pub mod record;

pub use prediction::{Decision, Prediction, RiskLevel, RiskLevelThresholds};
pub use record::{FieldValue, Record};
