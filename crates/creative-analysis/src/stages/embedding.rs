use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use super::remote::{inline_frames, InlineFile, RemoteInference};
use super::{EmbeddingOutput, Embedder, StageKind};
use crate::error::StageError;

pub const DEFAULT_EMBEDDING_MODEL: &str = "ViT-B/32";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    frames: Vec<InlineFile>,
}

/// Frame and creative embeddings from a remote CLIP-style model.
pub struct RemoteEmbedder {
    remote: RemoteInference,
    model: String,
}

impl RemoteEmbedder {
    pub fn new(remote: RemoteInference, model: impl Into<String>) -> Self {
        Self {
            remote,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, frames: &[PathBuf]) -> Result<EmbeddingOutput, StageError> {
        if frames.is_empty() {
            return Err(StageError::MissingInput {
                stage: StageKind::Embedding,
                input: "frames",
            });
        }

        let request = EmbeddingRequest {
            model: &self.model,
            frames: inline_frames(StageKind::Embedding, frames).await?,
        };
        self.remote.call(StageKind::Embedding, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::remote::DEFAULT_INFERENCE_TIMEOUT;

    #[tokio::test]
    async fn test_embed_requires_frames() {
        let remote =
            RemoteInference::new("http://127.0.0.1:9", None, DEFAULT_INFERENCE_TIMEOUT).unwrap();
        let embedder = RemoteEmbedder::new(remote, DEFAULT_EMBEDDING_MODEL);

        assert_eq!(embedder.model_id(), "ViT-B/32");
        let result = embedder.embed(&[]).await;
        assert!(matches!(result, Err(StageError::MissingInput { .. })));
    }
}
