//! Task-addressed file area for uploaded sources and result documents.
//!
//! ```text
//! <root>/uploads/<task_id>.<ext>    original upload bytes
//! <root>/results/<task_id>.json     stored payload, pretty-printed
//! ```
//!
//! Files are written by [`ArtifactStore::stage`] before the record is
//! created and removed again unless [`StagedArtifacts::commit`] is called,
//! so a failed or cancelled upload leaves nothing behind.

use crate::error::FormError;
use crate::output::StructuredPayload;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Root of the artifact area.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_path(&self, task_id: &str, extension: &str) -> PathBuf {
        self.root
            .join("uploads")
            .join(format!("{task_id}.{extension}"))
    }

    pub fn result_path(&self, task_id: &str) -> PathBuf {
        self.root.join("results").join(format!("{task_id}.json"))
    }

    /// Write both artifacts for `task_id`. They are deleted when the
    /// returned guard drops uncommitted.
    pub fn stage(
        &self,
        task_id: &str,
        extension: &str,
        source: &[u8],
        payload: &StructuredPayload,
    ) -> Result<StagedArtifacts, FormError> {
        let mut staged = StagedArtifacts {
            paths: Vec::with_capacity(2),
            committed: false,
        };

        let upload = self.upload_path(task_id, extension);
        write_file(&upload, source)?;
        staged.paths.push(upload);

        let result = self.result_path(task_id);
        let json = serde_json::to_vec_pretty(payload)
            .map_err(|e| FormError::Internal(format!("result encoding: {e}")))?;
        write_file(&result, &json)?;
        staged.paths.push(result);

        debug!("Staged artifacts for task {}", task_id);
        Ok(staged)
    }

    /// Remove both artifacts for `task_id`, ignoring ones that do not exist.
    pub fn remove(&self, task_id: &str, extension: &str) -> Result<(), FormError> {
        for path in [self.upload_path(task_id, extension), self.result_path(task_id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(FormError::io(path, e)),
            }
        }
        Ok(())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), FormError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FormError::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| FormError::io(path, e))
}

/// Files written for one task, removed on drop unless committed.
#[derive(Debug)]
#[must_use = "staged artifacts are deleted on drop unless committed"]
pub struct StagedArtifacts {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl StagedArtifacts {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Keep the files.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedArtifacts {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                warn!("Could not remove staged file {}: {}", path.display(), e);
            }
        }
    }
}
