//! JSON client for a model-serving endpoint.
//!
//! Each stage is served at `POST {endpoint}/v1/{stage}`. Frames and media are
//! sent inline as base64 so the server needs no access to local scratch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::StageKind;
use crate::error::StageError;
use crate::{http, sanitize};

/// Default request timeout for inference calls (5 minutes).
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize)]
pub struct InlineFile {
    pub name: String,
    pub data: String,
}

impl InlineFile {
    pub async fn read(stage: StageKind, path: &Path) -> Result<Self, StageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StageError::Inference {
                stage,
                reason: format!("failed to read {}: {}", sanitize::redact_path(path), e),
            })?;
        Ok(Self {
            name: sanitize::redact_path(path),
            data: BASE64.encode(bytes),
        })
    }
}

/// Reads each frame into an inline payload, preserving order.
pub async fn inline_frames(
    stage: StageKind,
    frames: &[PathBuf],
) -> Result<Vec<InlineFile>, StageError> {
    let mut out = Vec::with_capacity(frames.len());
    for frame in frames {
        out.push(InlineFile::read(stage, frame).await?);
    }
    Ok(out)
}

/// Shared client for all remote stages.
#[derive(Clone)]
pub struct RemoteInference {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl RemoteInference {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::create_http_client(Some(timeout))?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn stage_url(&self, stage: StageKind) -> String {
        format!("{}/v1/{}", self.endpoint, stage.as_str())
    }

    /// Posts `body` to the stage route and decodes the stage's output schema.
    pub async fn call<B, T>(&self, stage: StageKind, body: &B) -> Result<T, StageError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.stage_url(stage);
        debug!("Calling {} inference", stage);

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| StageError::Inference {
            stage,
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(StageError::Inference {
                stage,
                reason: http::error_summary(response).await,
            });
        }

        let text = response.text().await.map_err(|e| StageError::Inference {
            stage,
            reason: e.to_string(),
        })?;

        serde_json::from_str(&text).map_err(|e| StageError::MalformedOutput {
            stage,
            reason: e.to_string(),
        })
    }
}
