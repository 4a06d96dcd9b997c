//! Pinecone data-plane client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{VectorError, VectorIndex, VectorRecord};
use crate::http;

/// Maximum vectors per upsert request.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Default request timeout for index writes (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: SecretString,
}

impl PineconeIndex {
    /// `host` is the index's data-plane host, with or without a scheme.
    pub fn new(host: &str, api_key: SecretString) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::create_http_client(Some(DEFAULT_REQUEST_TIMEOUT))?,
            host: normalize_host(host),
            api_key,
        })
    }

    fn upsert_url(&self) -> String {
        format!("{}/vectors/upsert", self.host)
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), VectorError> {
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let response = self
                .client
                .post(self.upsert_url())
                .header("Api-Key", self.api_key.expose_secret())
                .json(&UpsertRequest {
                    vectors: batch,
                    namespace,
                })
                .send()
                .await
                .map_err(|e| VectorError::Request(e.to_string()))?;

            if !response.status().is_success() {
                return Err(VectorError::Rejected(http::error_summary(response).await));
            }

            let body: UpsertResponse = response
                .json()
                .await
                .map_err(|e| VectorError::Request(e.to_string()))?;
            if body.upserted_count != batch.len() {
                return Err(VectorError::Rejected(format!(
                    "upserted {} of {} vectors",
                    body.upserted_count,
                    batch.len()
                )));
            }

            debug!("Upserted {} vectors into '{}'", batch.len(), namespace);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;
    use crate::vector::VectorMetadata;

    #[test]
    fn test_normalize_host() {
        assert_eq!(
            normalize_host("creative-embeddings-abc.svc.pinecone.io"),
            "https://creative-embeddings-abc.svc.pinecone.io"
        );
        assert_eq!(
            normalize_host("http://localhost:5080/"),
            "http://localhost:5080"
        );
    }

    #[test]
    fn test_upsert_body_shape() {
        let records = vec![VectorRecord {
            id: "c-1".to_string(),
            values: vec![0.5, 0.25],
            metadata: VectorMetadata {
                platform: "tiktok".to_string(),
                niche: "beauty".to_string(),
                media_type: MediaType::Video,
            },
        }];
        let body = serde_json::to_value(UpsertRequest {
            vectors: &records,
            namespace: "creatives",
        })
        .unwrap();

        assert_eq!(body["namespace"], "creatives");
        assert_eq!(body["vectors"][0]["id"], "c-1");
        assert_eq!(body["vectors"][0]["values"][1], 0.25);
        assert_eq!(body["vectors"][0]["metadata"]["media_type"], "video");
    }

    #[test]
    fn test_upsert_url() {
        let index =
            PineconeIndex::new("idx.svc.pinecone.io", SecretString::from("key".to_string()))
                .unwrap();
        assert_eq!(index.upsert_url(), "https://idx.svc.pinecone.io/vectors/upsert");
    }
}
