//! Byte storage for artifact bundles, keyed by run id

use crate::artifact::{write_atomic, ArtifactBundle};
use crate::error::{PipelineError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the bundle inside a run directory
pub const BUNDLE_FILE: &str = "bundle.bin";

/// Where bundles live. Implementations must make `write` all-or-nothing.
pub trait ArtifactStore: Send + Sync {
    fn write(&self, run_id: &str, bytes: &[u8]) -> Result<()>;

    /// Fails with `RunNotFound` when nothing was stored for `run_id`
    fn read(&self, run_id: &str) -> Result<Vec<u8>>;

    fn exists(&self, run_id: &str) -> bool;

    fn save_bundle(&self, bundle: &ArtifactBundle) -> Result<()> {
        self.write(&bundle.run_id, &bundle.to_bytes()?)
    }

    /// Decode the bundle stored for `run_id`; a bundle recorded under a
    /// different run id is corrupt
    fn load_bundle(&self, run_id: &str) -> Result<ArtifactBundle> {
        let bundle = ArtifactBundle::from_bytes(&self.read(run_id)?)?;
        if bundle.run_id != run_id {
            return Err(PipelineError::CorruptArtifact(format!(
                "bundle stored under run '{}' belongs to run '{}'",
                run_id, bundle.run_id
            )));
        }
        Ok(bundle)
    }
}

/// `<root>/<run_id>/bundle.bin` on the local filesystem
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_path(&self, run_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(check_run_id(run_id)?).join(BUNDLE_FILE))
    }
}

/// Run ids become directory names, so path separators and dot segments
/// are rejected.
pub(crate) fn check_run_id(run_id: &str) -> Result<&str> {
    let bad = run_id.is_empty()
        || run_id == "."
        || run_id == ".."
        || run_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(PipelineError::RunNotFound(format!(
            "invalid run id '{}'",
            run_id
        )));
    }
    Ok(run_id)
}

impl ArtifactStore for FsArtifactStore {
    fn write(&self, run_id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.bundle_path(run_id)?;
        write_atomic(&path, bytes)?;
        debug!(run_id, path = %path.display(), "Bundle stored");
        Ok(())
    }

    fn read(&self, run_id: &str) -> Result<Vec<u8>> {
        let path = self.bundle_path(run_id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PipelineError::RunNotFound(run_id.to_string()),
            _ => PipelineError::Io(e),
        })
    }

    fn exists(&self, run_id: &str) -> bool {
        self.bundle_path(run_id).map(|p| p.is_file()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        assert!(!store.exists("run-1"));
        store.write("run-1", b"payload").unwrap();
        assert!(store.exists("run-1"));
        assert_eq!(store.read("run-1").unwrap(), b"payload");
        assert!(dir.path().join("run-1").join(BUNDLE_FILE).is_file());
    }

    #[test]
    fn test_overwrite_replaces_bundle() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.write("run-1", b"first").unwrap();
        store.write("run-1", b"second").unwrap();
        assert_eq!(store.read("run-1").unwrap(), b"second");
    }

    #[test]
    fn test_missing_run() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(matches!(
            store.read("nope"),
            Err(PipelineError::RunNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_path_like_run_ids() {
        let store = FsArtifactStore::new("/tmp/unused");
        for id in ["", "..", "a/b", "..\\x"] {
            assert!(store.bundle_path(id).is_err(), "accepted {:?}", id);
        }
        assert!(!store.exists("../etc"));
    }

    #[test]
    fn test_corrupt_bytes_surface_on_load() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.write("run-1", b"not a bundle").unwrap();
        assert!(matches!(
            store.load_bundle("run-1"),
            Err(PipelineError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn test_bundle_under_foreign_run_id_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let bundle = crate::models::inference::tests::bundle("run-a");
        store.save_bundle(&bundle).unwrap();
        assert_eq!(store.load_bundle("run-a").unwrap(), bundle);

        store.write("run-b", &store.read("run-a").unwrap()).unwrap();
        let err = store.load_bundle("run-b").unwrap_err();
        assert!(matches!(err, PipelineError::CorruptArtifact(_)), "{:?}", err);
    }
}
