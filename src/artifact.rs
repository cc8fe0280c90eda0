//! Artifact bundle: the fitted vectorizer, the model trained on its output,
//! the feature schema and the hyperparameters, persisted as one unit.
//!
//! On disk a bundle is a small binary frame around a JSON payload:
//!
//! ```text
//! magic "TRPB" | format version u32 LE | crc32 u32 LE | payload len u64 LE | payload
//! ```
//!
//! Loading verifies the frame, decodes the payload and then checks that
//! the vectorizer and the model agree on the feature dimension. A bundle
//! that fails any of these checks is rejected as corrupt rather than
//! served.

use crate::error::{PipelineError, Result};
use crate::models::{Classifier, Model, ModelParams};
use crate::schema::FeatureSchema;
use crate::types::{Prediction, Record};
use crate::vectorizer::{VectorizerBinding, SEPARATOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

const MAGIC: &[u8; 4] = b"TRPB";
const HEADER_LEN: usize = 20;

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    /// Training run that produced the bundle; doubles as model version
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub schema: FeatureSchema,
    pub vectorizer: VectorizerBinding,
    pub model: Model,
    pub hyperparameters: ModelParams,
    /// Holdout metrics recorded at training time
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl ArtifactBundle {
    /// Pair a fitted vectorizer with the model trained on its output
    pub fn new(
        run_id: impl Into<String>,
        schema: FeatureSchema,
        vectorizer: VectorizerBinding,
        model: Model,
    ) -> Result<Self> {
        let hyperparameters = model.hyperparameters();
        let bundle = Self {
            run_id: run_id.into(),
            created_at: Utc::now(),
            schema,
            vectorizer,
            model,
            hyperparameters,
            metrics: BTreeMap::new(),
        };
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn with_metrics(mut self, metrics: BTreeMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn model_version(&self) -> &str {
        &self.run_id
    }

    pub fn feature_names(&self) -> &[String] {
        self.vectorizer.feature_names()
    }

    /// Score a record that already follows the bundle's schema
    pub fn predict(&self, record: &Record) -> Result<Prediction> {
        let features = self.vectorizer.transform(record);
        self.predict_vector(&features)
    }

    pub fn predict_vector(&self, features: &[f64]) -> Result<Prediction> {
        let probability = self.model.predict_proba(features)?;
        Ok(Prediction { probability })
    }

    /// Consistency between vectorizer, model, schema and hyperparameters
    pub fn validate(&self) -> Result<()> {
        self.model
            .validate()
            .map_err(PipelineError::CorruptArtifact)?;

        let expected = self.model.n_features().unwrap_or(0);
        if expected != self.vectorizer.len() {
            return Err(PipelineError::CorruptArtifact(format!(
                "vectorizer produces {} features but the model expects {}",
                self.vectorizer.len(),
                expected
            )));
        }

        if self.hyperparameters != self.model.hyperparameters() {
            return Err(PipelineError::CorruptArtifact(
                "recorded hyperparameters do not match the model".to_string(),
            ));
        }

        if let Some(orphan) = self
            .vectorizer
            .feature_names()
            .iter()
            .find(|name| !self.schema_owns(name))
        {
            return Err(PipelineError::CorruptArtifact(format!(
                "feature '{}' is not produced by any schema field",
                orphan
            )));
        }
        Ok(())
    }

    fn schema_owns(&self, feature: &str) -> bool {
        if self.schema.numerical.iter().any(|n| n == feature) {
            return true;
        }
        self.schema.categorical.iter().any(|c| {
            feature
                .strip_prefix(c.as_str())
                .is_some_and(|rest| rest.starts_with(SEPARATOR))
        })
    }

    /// Encode into the framed on-disk representation
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode and validate a framed bundle
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(PipelineError::CorruptArtifact(format!(
                "bundle is {} bytes, shorter than its header",
                bytes.len()
            )));
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);
        if &header[0..4] != MAGIC {
            return Err(PipelineError::CorruptArtifact(
                "bad magic bytes".to_string(),
            ));
        }

        let version = u32::from_le_bytes(le_bytes(&header[4..8]));
        if version != FORMAT_VERSION {
            return Err(PipelineError::CorruptArtifact(format!(
                "unsupported format version {}",
                version
            )));
        }

        let checksum = u32::from_le_bytes(le_bytes(&header[8..12]));
        let declared_len = u64::from_le_bytes(le_bytes(&header[12..20]));
        if declared_len != payload.len() as u64 {
            return Err(PipelineError::CorruptArtifact(format!(
                "payload is {} bytes, header declares {}",
                payload.len(),
                declared_len
            )));
        }
        let actual = crc32fast::hash(payload);
        if actual != checksum {
            return Err(PipelineError::CorruptArtifact(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                checksum, actual
            )));
        }

        let bundle: ArtifactBundle = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::CorruptArtifact(format!("undecodable payload: {}", e)))?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Write the bundle atomically: either the whole bundle lands at
    /// `destination` or nothing does.
    pub fn save<P: AsRef<Path>>(&self, destination: P) -> Result<()> {
        let destination = destination.as_ref();
        let bytes = self.to_bytes()?;
        write_atomic(destination, &bytes)?;
        info!(
            run_id = %self.run_id,
            path = %destination.display(),
            size = bytes.len(),
            features = self.vectorizer.len(),
            "Artifact bundle saved"
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(source: P) -> Result<Self> {
        let source = source.as_ref();
        let bytes = fs::read(source)?;
        let bundle = Self::from_bytes(&bytes)?;
        info!(
            run_id = %bundle.run_id,
            path = %source.display(),
            model = bundle.model.name(),
            features = bundle.vectorizer.len(),
            "Artifact bundle loaded"
        );
        Ok(bundle)
    }
}

fn le_bytes<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Write to a sibling temp file, fsync, then rename over `path` and fsync
/// the directory so the rename itself is durable.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        sync_dir(&parent)
    })();

    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        return Err(e.into());
    }

    debug!(path = %path.display(), size = data.len(), "Atomic write complete");
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoostingParams, ModelParams};
    use crate::schema::{ColumnType, SchemaOptions};
    use crate::vectorizer::DictVectorizer;
    use tempfile::tempdir;

    fn trained_bundle() -> ArtifactBundle {
        let columns = vec![
            ("merchant_category".to_string(), ColumnType::String),
            ("amount".to_string(), ColumnType::Numeric),
            ("is_fraud".to_string(), ColumnType::Numeric),
        ];
        let options = SchemaOptions {
            label: "is_fraud".to_string(),
            ..SchemaOptions::default()
        };
        let schema = FeatureSchema::classify(&columns, &options).unwrap();

        let records: Vec<Record> = (0..30)
            .map(|i| {
                let category = ["grocery", "travel", "casino"][i % 3];
                Record::new()
                    .with("merchant_category", category)
                    .with("amount", (i * 37 % 500) as f64)
            })
            .collect();
        let labels: Vec<u8> = (0..30).map(|i| u8::from(i % 3 == 2)).collect();

        let mut vectorizer = DictVectorizer::new();
        let binding = vectorizer.fit(&records).unwrap();
        let x = binding.transform_batch(&records).unwrap();

        let mut model = Model::from_params(&ModelParams::GradientBoosting(BoostingParams {
            num_boost_round: 10,
            min_child_weight: 1.0,
            eta: 0.3,
            ..BoostingParams::default()
        }));
        model.fit(&x, &labels).unwrap();

        ArtifactBundle::new("run-test", schema, binding, model).unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.bin");
        let bundle = trained_bundle();
        bundle.save(&path).unwrap();

        let loaded = ArtifactBundle::load(&path).unwrap();
        assert_eq!(loaded.feature_names(), bundle.feature_names());

        let probe = Record::new()
            .with("merchant_category", "casino")
            .with("amount", 120.0);
        assert_eq!(
            loaded.predict(&probe).unwrap(),
            bundle.predict(&probe).unwrap()
        );
        assert_eq!(loaded, bundle);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        trained_bundle().save(dir.path().join("bundle.bin")).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_atomic_overwrite_in_new_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs").join("r1").join("bundle.bin");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(sync_dir(dir.path()).is_ok());
    }

    #[test]
    fn test_failed_save_writes_nothing() {
        let dir = tempdir().unwrap();
        // Destination is an existing directory, so the final rename fails.
        let target = dir.path().join("occupied");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();

        assert!(trained_bundle().save(&target).is_err());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_mismatched_dimensions_are_corrupt() {
        let bundle = trained_bundle();
        let other = {
            let records = vec![Record::new().with("amount", 1.0)];
            DictVectorizer::new().fit(&records).unwrap()
        };
        let mut tampered = bundle.clone();
        tampered.vectorizer = other;

        let payload = serde_json::to_vec(&tampered).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);

        let err = ArtifactBundle::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptArtifact(_)));
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let mut bytes = trained_bundle().to_bytes().unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        assert!(matches!(
            ArtifactBundle::from_bytes(&bytes),
            Err(PipelineError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn test_truncated_is_corrupt() {
        let bytes = trained_bundle().to_bytes().unwrap();
        for len in [0, 10, HEADER_LEN, bytes.len() - 1] {
            assert!(matches!(
                ArtifactBundle::from_bytes(&bytes[..len]),
                Err(PipelineError::CorruptArtifact(_))
            ));
        }
    }

    #[test]
    fn test_unfitted_model_rejected() {
        let bundle = trained_bundle();
        let result = ArtifactBundle::new(
            "run-x",
            bundle.schema.clone(),
            bundle.vectorizer.clone(),
            Model::from_params(&ModelParams::default()),
        );
        assert!(matches!(result, Err(PipelineError::CorruptArtifact(_))));
    }
}
