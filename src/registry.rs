//! Run registry: one `run.json` per training run, next to its bundle.
//!
//! The registry is only used to decide which bundle to load. Lookups scan
//! the run directories under the root, so there is no index to keep in
//! sync with the artifact store.

use crate::artifact::write_atomic;
use crate::error::{PipelineError, Result};
use crate::models::ModelParams;
use crate::store::check_run_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const RUN_FILE: &str = "run.json";

/// Metadata recorded for a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment: String,
    pub algorithm: String,
    pub params: ModelParams,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().filter(|v| v.is_finite())
    }
}

/// Direction in which a metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOrder {
    /// Smaller is better (losses, error rates)
    #[default]
    Ascending,
    /// Larger is better (AUC, accuracy)
    Descending,
}

#[derive(Debug, Clone)]
pub struct RunRegistry {
    root: PathBuf,
}

impl RunRegistry {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record(&self, run: &RunInfo) -> Result<()> {
        let path = self.root.join(check_run_id(&run.run_id)?).join(RUN_FILE);
        let bytes = serde_json::to_vec_pretty(run)?;
        write_atomic(&path, &bytes)?;
        info!(
            run_id = %run.run_id,
            experiment = %run.experiment,
            algorithm = %run.algorithm,
            metrics = ?run.metrics,
            "Run recorded"
        );
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> Result<RunInfo> {
        let path = self.root.join(check_run_id(run_id)?).join(RUN_FILE);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PipelineError::RunNotFound(run_id.to_string()),
            _ => PipelineError::Io(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All readable runs of an experiment, oldest first. Unreadable run
    /// files are logged and skipped.
    pub fn list(&self, experiment: &str) -> Result<Vec<RunInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let path = entry?.path().join(RUN_FILE);
            if !path.is_file() {
                continue;
            }
            let parsed = fs::read(&path)
                .map_err(PipelineError::from)
                .and_then(|b| serde_json::from_slice::<RunInfo>(&b).map_err(PipelineError::from));
            match parsed {
                Ok(run) if run.experiment == experiment => runs.push(run),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run"),
            }
        }

        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        debug!(experiment, count = runs.len(), "Runs listed");
        Ok(runs)
    }

    /// Best run by `metric`. Runs without the metric are ignored; ties go
    /// to the most recent run.
    pub fn best_run(&self, experiment: &str, metric: &str, order: MetricOrder) -> Result<RunInfo> {
        let best = self
            .list(experiment)?
            .into_iter()
            .filter_map(|run| run.metric(metric).map(|value| (value, run)))
            .max_by(|(a, _), (b, _)| {
                let by_value = a.total_cmp(b);
                match order {
                    MetricOrder::Descending => by_value,
                    MetricOrder::Ascending => by_value.reverse(),
                }
            });

        match best {
            Some((value, run)) => {
                info!(
                    experiment,
                    metric,
                    value,
                    run_id = %run.run_id,
                    "Best run selected"
                );
                Ok(run)
            }
            None => Err(PipelineError::RunNotFound(format!(
                "no run of '{}' reports metric '{}'",
                experiment, metric
            ))),
        }
    }

    pub fn latest_run(&self, experiment: &str) -> Result<RunInfo> {
        self.list(experiment)?
            .pop()
            .ok_or_else(|| PipelineError::RunNotFound(format!("no runs for '{}'", experiment)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn run(id: &str, experiment: &str, minutes: i64, metrics: &[(&str, f64)]) -> RunInfo {
        RunInfo {
            run_id: id.to_string(),
            experiment: experiment.to_string(),
            algorithm: "random_forest".to_string(),
            params: ModelParams::default(),
            metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_record_and_get() {
        let dir = tempdir().unwrap();
        let registry = RunRegistry::new(dir.path());
        let info = run("a", "fraud", 0, &[("roc_auc", 0.9)]);
        registry.record(&info).unwrap();
        assert_eq!(registry.get("a").unwrap(), info);
        assert!(matches!(
            registry.get("missing"),
            Err(PipelineError::RunNotFound(_))
        ));
    }

    #[test]
    fn test_best_run_by_order() {
        let dir = tempdir().unwrap();
        let registry = RunRegistry::new(dir.path());
        registry
            .record(&run("a", "fraud", 0, &[("roc_auc", 0.91), ("log_loss", 0.30)]))
            .unwrap();
        registry
            .record(&run("b", "fraud", 1, &[("roc_auc", 0.95), ("log_loss", 0.35)]))
            .unwrap();
        registry
            .record(&run("c", "churn", 2, &[("roc_auc", 0.99)]))
            .unwrap();
        registry.record(&run("d", "fraud", 3, &[])).unwrap();

        let best = registry
            .best_run("fraud", "roc_auc", MetricOrder::Descending)
            .unwrap();
        assert_eq!(best.run_id, "b");

        let best = registry
            .best_run("fraud", "log_loss", MetricOrder::Ascending)
            .unwrap();
        assert_eq!(best.run_id, "a");
    }

    #[test]
    fn test_ties_go_to_latest() {
        let dir = tempdir().unwrap();
        let registry = RunRegistry::new(dir.path());
        registry.record(&run("old", "x", 0, &[("m", 1.0)])).unwrap();
        registry.record(&run("new", "x", 5, &[("m", 1.0)])).unwrap();
        let best = registry.best_run("x", "m", MetricOrder::Ascending).unwrap();
        assert_eq!(best.run_id, "new");
    }

    #[test]
    fn test_latest_and_empty() {
        let dir = tempdir().unwrap();
        let registry = RunRegistry::new(dir.path().join("does-not-exist"));
        assert!(registry.list("fraud").unwrap().is_empty());
        assert!(registry.latest_run("fraud").is_err());
        assert!(registry
            .best_run("fraud", "roc_auc", MetricOrder::Descending)
            .is_err());

        let registry = RunRegistry::new(dir.path());
        registry.record(&run("first", "fraud", 0, &[])).unwrap();
        registry.record(&run("second", "fraud", 10, &[])).unwrap();
        assert_eq!(registry.latest_run("fraud").unwrap().run_id, "second");
    }

    #[test]
    fn test_unreadable_runs_are_skipped() {
        let dir = tempdir().unwrap();
        let registry = RunRegistry::new(dir.path());
        registry.record(&run("good", "fraud", 0, &[])).unwrap();
        fs::create_dir_all(dir.path().join("bad")).unwrap();
        fs::write(dir.path().join("bad").join(RUN_FILE), b"{").unwrap();
        assert_eq!(registry.list("fraud").unwrap().len(), 1);
    }
}
