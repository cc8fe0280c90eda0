//! Bundle loader: resolves which run to serve and reads its bundle

use crate::artifact::ArtifactBundle;
use crate::config::ArtifactsConfig;
use crate::error::Result;
use crate::models::Classifier;
use crate::registry::{MetricOrder, RunRegistry};
use crate::store::{ArtifactStore, FsArtifactStore};
use std::sync::Arc;
use tracing::info;

/// Which run's bundle to load
#[derive(Debug, Clone, PartialEq)]
pub enum BundleSelector {
    /// A specific run id
    Run(String),
    /// Best run of the experiment by a recorded metric
    Best { metric: String, order: MetricOrder },
    /// Most recently recorded run of the experiment
    Latest,
}

/// Loader for artifact bundles
#[derive(Clone)]
pub struct ModelLoader {
    store: Arc<dyn ArtifactStore>,
    registry: RunRegistry,
    experiment: String,
    default_selector: BundleSelector,
}

impl ModelLoader {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        registry: RunRegistry,
        experiment: impl Into<String>,
        default_selector: BundleSelector,
    ) -> Self {
        Self {
            store,
            registry,
            experiment: experiment.into(),
            default_selector,
        }
    }

    /// Filesystem store and registry sharing the configured root
    pub fn from_config(config: &ArtifactsConfig) -> Self {
        let selector = match (&config.run_id, &config.selection_metric) {
            (Some(run_id), _) => BundleSelector::Run(run_id.clone()),
            (None, Some(metric)) => BundleSelector::Best {
                metric: metric.clone(),
                order: config.selection_order,
            },
            (None, None) => BundleSelector::Latest,
        };
        Self::new(
            Arc::new(FsArtifactStore::new(&config.root)),
            RunRegistry::new(&config.root),
            config.experiment.clone(),
            selector,
        )
    }

    pub fn default_selector(&self) -> &BundleSelector {
        &self.default_selector
    }

    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Run id a selector currently points at
    pub fn resolve(&self, selector: &BundleSelector) -> Result<String> {
        match selector {
            BundleSelector::Run(run_id) => Ok(run_id.clone()),
            BundleSelector::Best { metric, order } => Ok(self
                .registry
                .best_run(&self.experiment, metric, *order)?
                .run_id),
            BundleSelector::Latest => Ok(self.registry.latest_run(&self.experiment)?.run_id),
        }
    }

    /// Resolve and load a bundle; the bundle is fully validated
    pub fn load(&self, selector: &BundleSelector) -> Result<ArtifactBundle> {
        let run_id = self.resolve(selector)?;
        info!(run_id = %run_id, selector = ?selector, "Loading artifact bundle");

        let bundle = self.store.load_bundle(&run_id)?;
        info!(
            run_id = %bundle.run_id,
            model = bundle.model.name(),
            features = bundle.vectorizer.len(),
            "Bundle loaded successfully"
        );
        Ok(bundle)
    }

    pub fn load_default(&self) -> Result<ArtifactBundle> {
        self.load(&self.default_selector)
    }
}
