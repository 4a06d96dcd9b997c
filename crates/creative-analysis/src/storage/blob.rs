//! Remote object acquisition.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::error::AnalysisError;
use crate::media::MediaType;
use crate::sanitize;

const GS_SCHEME: &str = "gs://";

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Transfer failed for '{uri}': {reason}")]
    Transfer { uri: String, reason: String },

    #[error("Invalid storage URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

impl From<BlobError> for AnalysisError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(uri) => AnalysisError::NotFound(uri),
            BlobError::Transfer { uri, reason } => AnalysisError::Transfer { uri, reason },
            // A locator that can never resolve is reported the same as a missing object.
            BlobError::InvalidUri { uri, reason } => {
                AnalysisError::NotFound(format!("{} ({})", uri, reason))
            }
        }
    }
}

/// Two-part remote locator: `gs://<container>/<object path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUri {
    pub container: String,
    pub object: String,
}

impl StorageUri {
    pub fn new(container: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            object: object.into(),
        }
    }

    pub fn parse(uri: &str) -> Result<Self, BlobError> {
        let invalid = |reason: &str| BlobError::InvalidUri {
            uri: sanitize::redact_uri(uri),
            reason: reason.to_string(),
        };

        let rest = uri
            .trim()
            .strip_prefix(GS_SCHEME)
            .ok_or_else(|| invalid("expected gs:// scheme"))?;
        let (container, object) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing object path"))?;

        if container.is_empty() {
            return Err(invalid("empty container"));
        }
        if object.is_empty() {
            return Err(invalid("empty object path"));
        }

        Ok(Self::new(container, object))
    }

    /// Extension of the object's file name, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.object.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            None
        } else {
            Some(ext)
        }
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", GS_SCHEME, self.container, self.object)
    }
}

/// Extension for the local copy of `uri`.
///
/// The object's own extension is kept when it matches the media type, so
/// decoders can rely on it; otherwise the media type's default is used.
pub fn local_extension(uri: &StorageUri, media_type: MediaType) -> String {
    match uri.extension() {
        Some(ext) if media_type.accepts_extension(ext) => ext.to_ascii_lowercase(),
        _ => media_type.default_extension().to_string(),
    }
}

/// Read access to remote blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Downloads `uri` to `destination`, overwriting any existing file.
    async fn fetch(&self, uri: &StorageUri, destination: &Path) -> Result<PathBuf, BlobError>;
}

/// Path of the in-progress download next to `destination`.
pub(crate) fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Serves containers as directories under a local root.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Maps `uri` to a path under the root. Every container and object
    /// segment must be a plain name.
    fn resolve(&self, uri: &StorageUri) -> Result<PathBuf, BlobError> {
        let invalid = |reason: &str| BlobError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if !is_plain_segment(&uri.container) || uri.container.contains('/') {
            return Err(invalid("container must be a single plain path segment"));
        }

        let mut path = self.root.join(&uri.container);
        for part in uri.object.split('/') {
            if !is_plain_segment(part) {
                return Err(invalid(
                    "object path must not contain empty, '.' or '..' segments",
                ));
            }
            path.push(part);
        }
        Ok(path)
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\\')
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn fetch(&self, uri: &StorageUri, destination: &Path) -> Result<PathBuf, BlobError> {
        let source = self.resolve(uri)?;
        let transfer = |e: std::io::Error| BlobError::Transfer {
            uri: uri.to_string(),
            reason: e.to_string(),
        };

        match tokio::fs::metadata(&source).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(BlobError::NotFound(uri.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(uri.to_string()))
            }
            Err(e) => return Err(transfer(e)),
        }

        let part = partial_path(destination);
        tokio::fs::copy(&source, &part).await.map_err(transfer)?;
        tokio::fs::rename(&part, destination)
            .await
            .map_err(transfer)?;

        Ok(destination.to_path_buf())
    }
}
