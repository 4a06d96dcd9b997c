//! Job-scoped scratch directories.
//!
//! Every job gets its own directory under the scratch root, named
//! `<creative>-<job_id>`. The handle removes the directory when released or
//! dropped, so no exit path leaves files behind.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::sanitize;

const FRAMES_DIR: &str = "frames";
const SOURCE_STEM: &str = "source";

/// Root under which per-job scratch directories are created.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Scratch root under the system temp directory.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("creative-analysis")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh directory for one job.
    ///
    /// Fails if the directory already exists, so two jobs can never end up
    /// sharing one.
    pub fn acquire(&self, creative_id: &str, job_id: Uuid) -> Result<ScratchHandle, AnalysisError> {
        std::fs::create_dir_all(&self.root).map_err(|e| AnalysisError::Scratch {
            path: self.root.clone(),
            source: e,
        })?;

        let name = format!("{}-{}", sanitize::path_component(creative_id), job_id);
        let path = self.root.join(name);
        std::fs::create_dir(&path).map_err(|e| AnalysisError::Scratch {
            path: path.clone(),
            source: e,
        })?;

        debug!("Acquired scratch directory {}", path.display());

        Ok(ScratchHandle {
            path,
            released: false,
        })
    }
}

/// Exclusive handle to one job's scratch directory.
#[derive(Debug)]
pub struct ScratchHandle {
    path: PathBuf,
    released: bool,
}

impl ScratchHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Destination for the downloaded asset, `source.<ext>`.
    pub fn media_path(&self, extension: &str) -> PathBuf {
        self.path.join(format!("{}.{}", SOURCE_STEM, extension))
    }

    /// Creates (if needed) and returns the directory frames are decoded into.
    pub fn frames_dir(&self) -> Result<PathBuf, AnalysisError> {
        let dir = self.path.join(FRAMES_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| AnalysisError::Scratch {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Removes the directory and everything in it.
    pub fn release(mut self) -> Result<(), AnalysisError> {
        self.released = true;
        remove_tree(&self.path).map_err(|e| AnalysisError::Scratch {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl Drop for ScratchHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_tree(&self.path) {
            warn!(
                "Failed to remove scratch directory {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
