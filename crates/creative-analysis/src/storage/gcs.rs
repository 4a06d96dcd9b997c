//! Google Cloud Storage adapter (JSON API, media download).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::blob::{partial_path, BlobError, BlobStore, StorageUri};
use crate::http;

pub const DEFAULT_GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// A download that delivers no bytes for this long is abandoned.
pub const DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GcsBlobStore {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl GcsBlobStore {
    pub fn new(token: Option<SecretString>) -> Result<Self, reqwest::Error> {
        Self::with_base_url(DEFAULT_GCS_BASE_URL, token)
    }

    /// Points the store at an alternative endpoint, such as a local emulator.
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: Option<SecretString>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::create_download_client(DOWNLOAD_READ_TIMEOUT)?,
            base_url: base_url.into(),
            token,
        })
    }

    fn media_url(&self, uri: &StorageUri) -> Result<Url, BlobError> {
        let invalid = |reason: String| BlobError::InvalidUri {
            uri: uri.to_string(),
            reason,
        };

        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", uri.container.as_str(), "o"])
            .push(&uri.object);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn fetch(&self, uri: &StorageUri, destination: &Path) -> Result<PathBuf, BlobError> {
        let transfer = |reason: String| BlobError::Transfer {
            uri: uri.to_string(),
            reason,
        };

        let url = self.media_url(uri)?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| transfer(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(BlobError::NotFound(uri.to_string())),
            s if !s.is_success() => return Err(transfer(http::error_summary(response).await)),
            _ => {}
        }

        let part = partial_path(destination);
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| transfer(e.to_string()))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transfer(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| transfer(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| transfer(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&part, destination)
            .await
            .map_err(|e| transfer(e.to_string()))?;

        debug!("Downloaded {} bytes from {}", written, uri);
        Ok(destination.to_path_buf())
    }
}
