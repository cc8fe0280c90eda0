//! Training run: dataset → feature contract → vectorizer → model → bundle

use crate::artifact::ArtifactBundle;
use crate::config::TrainingConfig;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::evaluation::EvaluationReport;
use crate::models::{Classifier, Model};
use crate::registry::{RunInfo, RunRegistry};
use crate::schema::FeatureSchema;
use crate::store::ArtifactStore;
use crate::vectorizer::DictVectorizer;
use std::time::Instant;
use tracing::{info, warn};

/// Everything a finished training run produced
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ArtifactBundle,
    pub run: RunInfo,
    /// `None` when the holdout split was empty
    pub report: Option<EvaluationReport>,
}

pub struct Trainer {
    config: TrainingConfig,
    experiment: String,
    /// Threshold used for the thresholded holdout metrics
    threshold: f64,
}

impl Trainer {
    pub fn new(config: TrainingConfig, experiment: impl Into<String>, threshold: f64) -> Self {
        Self {
            config,
            experiment: experiment.into(),
            threshold,
        }
    }

    /// Read the configured CSV, fit, then persist bundle and run metadata
    pub fn run(&self, store: &dyn ArtifactStore, registry: &RunRegistry) -> Result<TrainingOutcome> {
        info!(path = %self.config.dataset.display(), "Loading dataset");
        let dataset = Dataset::from_csv_path(&self.config.dataset)?;
        let outcome = self.fit(dataset)?;

        store.save_bundle(&outcome.bundle)?;
        registry.record(&outcome.run)?;
        info!(
            run_id = %outcome.run.run_id,
            experiment = %self.experiment,
            "Training run stored"
        );
        Ok(outcome)
    }

    /// Column normalisation applied before the schema is derived
    pub fn prepare(&self, dataset: Dataset) -> Dataset {
        let dataset = if self.config.lowercase_columns {
            dataset.lowercase_columns()
        } else {
            dataset
        };
        dataset.rename_columns(&self.config.renames)
    }

    /// Fit vectorizer and model in memory without touching storage
    pub fn fit(&self, dataset: Dataset) -> Result<TrainingOutcome> {
        let started = Instant::now();
        let dataset = self.prepare(dataset);

        let schema = FeatureSchema::classify(&dataset.column_types(), &self.config.schema)?;
        info!(
            rows = dataset.len(),
            categorical = ?schema.categorical,
            numerical = ?schema.numerical,
            excluded = ?schema.excluded,
            "Feature schema derived"
        );
        let dataset = dataset.drop_columns(&schema.excluded);

        let (train, test) = dataset.split(self.config.test_size, self.config.seed)?;
        info!(
            train = train.len(),
            test = test.len(),
            seed = self.config.seed,
            "Dataset split"
        );

        let y_train = train.labels(&schema.label)?;
        let train_records = schema.to_records(&train);

        let mut vectorizer = if self.config.sort_features {
            DictVectorizer::new()
        } else {
            DictVectorizer::unsorted()
        };
        let binding = vectorizer.fit(&train_records)?;
        let x_train = binding.transform_batch(&train_records)?;
        info!(features = binding.len(), "Vectorizer fitted");

        let mut model = Model::from_params(&self.config.model);
        model.fit(&x_train, &y_train)?;
        info!(
            algorithm = model.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model fitted"
        );

        let report = if test.is_empty() {
            warn!("Holdout split is empty, skipping evaluation");
            None
        } else {
            let y_test = test.labels(&schema.label)?;
            let scores = schema
                .to_records(&test)
                .iter()
                .map(|record| model.predict_proba(&binding.transform(record)))
                .collect::<Result<Vec<f64>>>()?;
            let report = EvaluationReport::compute(&y_test, &scores, self.threshold)?;
            info!(
                roc_auc = ?report.roc_auc,
                accuracy = report.accuracy,
                log_loss = report.log_loss,
                rmse = report.rmse,
                "Holdout evaluation"
            );
            Some(report)
        };
        let metrics = report.map(|r| r.to_metrics()).unwrap_or_default();

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let bundle = ArtifactBundle::new(run_id.clone(), schema, binding, model)?
            .with_metrics(metrics.clone());
        let run = RunInfo {
            run_id,
            experiment: self.experiment.clone(),
            algorithm: bundle.model.name().to_string(),
            params: bundle.hyperparameters.clone(),
            metrics,
            created_at: bundle.created_at,
        };

        Ok(TrainingOutcome {
            bundle,
            run,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::{BoostingParams, ForestParams, ModelParams};
    use crate::schema::SchemaOptions;
    use crate::store::FsArtifactStore;
    use crate::types::Record;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn churn_csv() -> String {
        let mut csv = String::from(
            "RowNumber,CustomerId,Surname,Geography,Gender,Age,Balance,IsActiveMember,Exited\n",
        );
        for i in 0..60 {
            let geography = ["France", "Spain", "Germany"][i % 3];
            let gender = if i % 2 == 0 { "Male" } else { "Female" };
            let age = 25 + (i * 7) % 40;
            let active = (i / 2) % 2;
            let exited = u8::from(age > 45);
            csv.push_str(&format!(
                "{},{},Name{},{},{},{},{}.5,{},{}\n",
                i + 1,
                15_600_000 + i,
                i,
                geography,
                gender,
                age,
                i * 1000,
                active,
                exited
            ));
        }
        csv
    }

    fn churn_config() -> TrainingConfig {
        TrainingConfig {
            dataset: "unused.csv".into(),
            lowercase_columns: true,
            renames: HashMap::from([
                ("isactivemember".to_string(), "is_active_member".to_string()),
                ("exited".to_string(), "churn".to_string()),
            ]),
            schema: SchemaOptions {
                label: "churn".to_string(),
                exclude: vec![
                    "rownumber".to_string(),
                    "customerid".to_string(),
                    "surname".to_string(),
                ],
                categorical_overrides: vec!["is_active_member".to_string()],
            },
            test_size: 0.2,
            seed: 11,
            sort_features: true,
            model: ModelParams::GradientBoosting(BoostingParams {
                num_boost_round: 20,
                min_child_weight: 1.0,
                eta: 0.3,
                ..BoostingParams::default()
            }),
        }
    }

    #[test]
    fn test_fit_churn_like_dataset() {
        let dataset = Dataset::from_csv_reader(churn_csv().as_bytes()).unwrap();
        let trainer = Trainer::new(churn_config(), "churn", 0.5);
        let outcome = trainer.fit(dataset).unwrap();

        let schema = &outcome.bundle.schema;
        assert_eq!(schema.label, "churn");
        assert_eq!(
            schema.categorical,
            vec!["geography", "gender", "is_active_member"]
        );
        assert_eq!(schema.numerical, vec!["age", "balance"]);
        assert!(outcome
            .bundle
            .feature_names()
            .contains(&"is_active_member=1".to_string()));
        assert!(!outcome
            .bundle
            .feature_names()
            .iter()
            .any(|f| f.starts_with("surname")));

        let report = outcome.report.unwrap();
        assert_eq!(report.samples, 12);
        assert_eq!(outcome.run.algorithm, "gradient_boosting");
        assert_eq!(outcome.run.run_id, outcome.bundle.run_id);
        assert!(outcome.run.metrics.contains_key("accuracy"));

        let older = Record::new()
            .with("geography", "Spain")
            .with("gender", "Male")
            .with("age", 62.0)
            .with("balance", 1000.0)
            .with("is_active_member", "1");
        let younger = older.clone().with("age", 26.0);
        let p_old = outcome.bundle.predict(&older).unwrap().probability;
        let p_young = outcome.bundle.predict(&younger).unwrap().probability;
        assert!(p_old > p_young);
    }

    #[test]
    fn test_missing_label_is_schema_error() {
        let dataset = Dataset::from_csv_reader(churn_csv().as_bytes()).unwrap();
        let mut config = churn_config();
        config.renames.clear();
        let err = Trainer::new(config, "churn", 0.5).fit(dataset).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }

    #[test]
    fn test_non_binary_label_is_schema_error() {
        let csv = "amount,is_fraud\n1.0,0\n2.0,2\n3.0,1\n4.0,0\n5.0,1\n";
        let dataset = Dataset::from_csv_reader(csv.as_bytes()).unwrap();
        let mut config = churn_config();
        config.renames.clear();
        config.schema = SchemaOptions {
            label: "is_fraud".to_string(),
            ..SchemaOptions::default()
        };
        config.test_size = 0.0;
        let err = Trainer::new(config, "fraud", 0.5).fit(dataset).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }

    #[test]
    fn test_run_persists_bundle_and_registry_entry() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("churn.csv");
        std::fs::write(&csv_path, churn_csv()).unwrap();

        let mut config = churn_config();
        config.dataset = csv_path;
        let store = FsArtifactStore::new(dir.path().join("artifacts"));
        let registry = RunRegistry::new(dir.path().join("artifacts"));

        let outcome = Trainer::new(config, "churn", 0.5)
            .run(&store, &registry)
            .unwrap();
        let run_id = &outcome.run.run_id;

        assert!(store.exists(run_id));
        assert_eq!(store.load_bundle(run_id).unwrap(), outcome.bundle);
        assert_eq!(registry.latest_run("churn").unwrap(), outcome.run);
    }

    #[test]
    fn test_non_finite_cells_still_produce_a_loadable_bundle() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("fraud.csv");
        let mut csv = String::from("Amount,Channel,Class\n");
        for i in 0..60 {
            let amount = match i % 7 {
                0 => "NaN".to_string(),
                3 => "inf".to_string(),
                _ => format!("{}", i * 20),
            };
            let channel = if i % 2 == 0 { "online" } else { "pos" };
            csv.push_str(&format!("{},{},{}\n", amount, channel, u8::from(i >= 30)));
        }
        std::fs::write(&csv_path, csv).unwrap();

        let config = TrainingConfig {
            dataset: csv_path,
            renames: HashMap::from([("class".to_string(), "is_fraud".to_string())]),
            schema: SchemaOptions {
                label: "is_fraud".to_string(),
                ..SchemaOptions::default()
            },
            model: ModelParams::RandomForest(ForestParams {
                n_estimators: 10,
                max_depth: 6,
                ..ForestParams::default()
            }),
            ..churn_config()
        };
        let store = FsArtifactStore::new(dir.path().join("artifacts"));
        let registry = RunRegistry::new(dir.path().join("artifacts"));

        let outcome = Trainer::new(config, "fraud", 0.5)
            .run(&store, &registry)
            .unwrap();
        assert_eq!(outcome.bundle.schema.numerical, vec!["amount"]);

        let loaded = store.load_bundle(&outcome.run.run_id).unwrap();
        assert_eq!(loaded, outcome.bundle);
        let probe = Record::new().with("amount", 900.0).with("channel", "pos");
        assert!(loaded.predict(&probe).unwrap().probability > 0.5);
    }
}
