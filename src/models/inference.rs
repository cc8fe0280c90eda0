//! Inference engine: owns the currently served bundle and scores requests

use crate::artifact::ArtifactBundle;
use crate::config::{AppConfig, DetectionConfig};
use crate::error::{PipelineError, Result};
use crate::models::loader::{BundleSelector, ModelLoader};
use crate::types::{Decision, RiskLevelThresholds};
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Serves predictions from one swappable artifact bundle.
///
/// Requests clone the current `Arc` and drop the lock before scoring, so a
/// reload is a single pointer swap and every request is scored entirely by
/// one bundle.
pub struct InferenceEngine {
    loader: ModelLoader,
    bundle: RwLock<Option<Arc<ArtifactBundle>>>,
    threshold: f64,
    risk_levels: RiskLevelThresholds,
    /// Request field echoed back as the record id
    id_field: Option<String>,
}

impl InferenceEngine {
    /// Create an engine with no bundle loaded
    pub fn new(loader: ModelLoader, detection: &DetectionConfig, id_field: Option<String>) -> Self {
        Self {
            loader,
            bundle: RwLock::new(None),
            threshold: detection.threshold,
            risk_levels: detection.risk_levels.clone(),
            id_field,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ModelLoader::from_config(&config.artifacts),
            &config.detection,
            config.server.id_field.clone(),
        )
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn loader(&self) -> &ModelLoader {
        &self.loader
    }

    /// Snapshot of the bundle being served
    pub fn current(&self) -> Option<Arc<ArtifactBundle>> {
        self.bundle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Swap in a bundle, returning the one it replaced
    pub fn install(&self, bundle: ArtifactBundle) -> Option<Arc<ArtifactBundle>> {
        let run_id = bundle.run_id.clone();
        let next = Arc::new(bundle);
        let mut slot = self
            .bundle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = slot.replace(next);
        drop(slot);

        info!(
            run_id = %run_id,
            previous = previous.as_ref().map(|b| b.run_id.as_str()),
            "Artifact bundle installed"
        );
        previous
    }

    /// Load a bundle (the configured default when `selector` is `None`)
    /// and swap it in. On any failure the served bundle is unchanged.
    pub fn reload(&self, selector: Option<&BundleSelector>) -> Result<Arc<ArtifactBundle>> {
        let selector = selector.unwrap_or_else(|| self.loader.default_selector());
        match self.loader.load(selector) {
            Ok(bundle) => {
                self.install(bundle);
                self.current().ok_or(PipelineError::ModelNotLoaded)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    kind = e.kind(),
                    serving = self.current().map(|b| b.run_id.clone()),
                    "Bundle reload failed, keeping current bundle"
                );
                Err(e)
            }
        }
    }

    /// Score one JSON record against the current bundle
    pub fn predict(&self, input: &Map<String, Value>) -> Result<Decision> {
        let bundle = self.current().ok_or(PipelineError::ModelNotLoaded)?;

        let record = bundle.schema.conform(input)?;
        let prediction = bundle.predict(&record)?;
        let decision = Decision::new(prediction, self.threshold, &self.risk_levels)
            .with_record_id(self.record_id(input))
            .with_model_version(bundle.model_version());

        debug!(
            model_version = %bundle.run_id,
            probability = decision.probability,
            label = decision.label,
            "Record scored"
        );
        Ok(decision)
    }

    fn record_id(&self, input: &Map<String, Value>) -> Option<String> {
        let field = self.id_field.as_deref()?;
        match input.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
