//! Configuration management for training and serving

use crate::models::{ForestParams, ModelParams};
use crate::registry::MetricOrder;
use crate::schema::SchemaOptions;
use crate::types::RiskLevelThresholds;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub artifacts: ArtifactsConfig,
    pub training: TrainingConfig,
    pub detection: DetectionConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request field echoed back as `record_id` (e.g. `customer_id`)
    #[serde(default)]
    pub id_field: Option<String>,
}

/// Artifact storage and bundle selection
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Root directory holding `<run_id>/bundle.bin` and `<run_id>/run.json`
    pub root: PathBuf,
    /// Experiment name runs are registered under
    pub experiment: String,
    /// Pin a specific run; otherwise the registry picks one
    #[serde(default)]
    pub run_id: Option<String>,
    /// Metric used to pick the best run; latest run when unset
    #[serde(default)]
    pub selection_metric: Option<String>,
    #[serde(default)]
    pub selection_order: MetricOrder,
}

/// Training run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// CSV dataset path
    pub dataset: PathBuf,
    #[serde(default = "default_true")]
    pub lowercase_columns: bool,
    /// Column renames applied after lowercasing
    #[serde(default)]
    pub renames: HashMap<String, String>,
    pub schema: SchemaOptions,
    /// Fraction of rows held out for evaluation
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_split_seed")]
    pub seed: u64,
    /// Sort vectorizer feature names (first-seen order otherwise)
    #[serde(default = "default_true")]
    pub sort_features: bool,
    #[serde(default)]
    pub model: ModelParams,
}

fn default_true() -> bool {
    true
}

fn default_test_size() -> f64 {
    0.2
}

fn default_split_seed() -> u64 {
    11
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Probability at or above which the label is positive
    pub threshold: f64,
    /// Risk level classification thresholds
    pub risk_levels: RiskLevelThresholds,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

/// Serving metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between periodic metric summaries; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl LoggingConfig {
    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` directives are honoured; `targets` are raised to the
    /// configured level on top of them.
    pub fn init_tracing(&self, targets: &[&str]) -> Result<()> {
        let mut filter = EnvFilter::from_default_env();
        for target in targets {
            filter = filter.add_directive(
                format!("{}={}", target, self.level)
                    .parse()
                    .with_context(|| format!("Invalid log level '{}'", self.level))?,
            );
        }

        let installed = match self.format.as_str() {
            "pretty" => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .try_init(),
            _ => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .try_init(),
        };
        installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            anyhow::bail!(
                "detection.threshold must be within [0, 1], got {}",
                self.detection.threshold
            );
        }
        let levels = &self.detection.risk_levels;
        if !(levels.medium <= levels.high && levels.high <= levels.critical) {
            anyhow::bail!("detection.risk_levels must be ordered medium <= high <= critical");
        }
        if !(self.training.test_size > 0.0 && self.training.test_size < 1.0) {
            anyhow::bail!(
                "training.test_size must be within (0, 1), got {}",
                self.training.test_size
            );
        }
        if self.training.schema.label.is_empty() {
            anyhow::bail!("training.schema.label must be set");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9696,
                id_field: None,
            },
            artifacts: ArtifactsConfig {
                root: PathBuf::from("artifacts"),
                experiment: "credit-card-fraud-detection".to_string(),
                run_id: None,
                selection_metric: Some("rmse".to_string()),
                selection_order: MetricOrder::Ascending,
            },
            training: TrainingConfig {
                dataset: PathBuf::from("data/creditcard_2023.csv"),
                lowercase_columns: true,
                renames: HashMap::from([("class".to_string(), "is_fraud".to_string())]),
                schema: SchemaOptions {
                    label: "is_fraud".to_string(),
                    exclude: Vec::new(),
                    categorical_overrides: Vec::new(),
                },
                test_size: default_test_size(),
                seed: default_split_seed(),
                sort_features: true,
                model: ModelParams::RandomForest(ForestParams::default()),
            },
            detection: DetectionConfig {
                threshold: 0.5,
                risk_levels: RiskLevelThresholds::default(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
            metrics: MetricsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9696);
        assert_eq!(config.detection.threshold, 0.5);
        assert_eq!(config.training.schema.label, "is_fraud");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 8080
id_field = "customer_id"

[artifacts]
root = "/tmp/artifacts"
experiment = "churn"
selection_metric = "roc_auc"
selection_order = "descending"

[training]
dataset = "data/churn.csv"
test_size = 0.25

[training.renames]
exited = "churn"

[training.schema]
label = "churn"
exclude = ["rownumber", "customerid", "surname"]
categorical_overrides = ["is_active_member"]

[training.model]
algorithm = "random_forest"
n_estimators = 50
max_depth = 8

[detection]
threshold = 0.4

[detection.risk_levels]
medium = 0.4
high = 0.7
critical = 0.9

[logging]
level = "debug"
format = "pretty"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.server.id_field.as_deref(), Some("customer_id"));
        assert_eq!(config.artifacts.selection_order, MetricOrder::Descending);
        assert_eq!(config.training.renames["exited"], "churn");
        assert_eq!(config.training.seed, 11);
        assert!(config.training.lowercase_columns);
        assert_eq!(
            config.training.schema.categorical_overrides,
            vec!["is_active_member".to_string()]
        );
        assert_eq!(
            config.training.model,
            ModelParams::RandomForest(ForestParams {
                n_estimators: 50,
                max_depth: 8,
                ..ForestParams::default()
            })
        );
        assert_eq!(config.metrics.report_interval_secs, 60);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = AppConfig::default();
        config.detection.threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.training.test_size = 1.0;
        assert!(config.validate().is_err());
    }
}
