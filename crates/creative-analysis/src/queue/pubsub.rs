//! Google Cloud Pub/Sub pull subscription over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Delivery, Payload, QueueError, Subscription};
use crate::http;

pub const DEFAULT_PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com";

/// Pull requests are long-polls; the server may hold them open for a while.
const PULL_TIMEOUT: Duration = Duration::from_secs(90);

/// Range Pub/Sub accepts for `ackDeadlineSeconds` on a lease extension.
const MIN_ACK_DEADLINE_SECS: u64 = 10;
const MAX_ACK_DEADLINE_SECS: u64 = 600;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: [&'a str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: [&'a str; 1],
    ack_deadline_seconds: u32,
}

pub struct PubSubSubscription {
    client: Client,
    base_url: String,
    /// Fully-qualified `projects/<project>/subscriptions/<name>`.
    subscription: String,
    token: Option<SecretString>,
}

impl PubSubSubscription {
    pub fn new(
        project_id: &str,
        subscription: &str,
        token: Option<SecretString>,
    ) -> Result<Self, reqwest::Error> {
        Self::with_base_url(DEFAULT_PUBSUB_BASE_URL, project_id, subscription, token)
    }

    /// Points the subscription at an alternative endpoint, such as the emulator.
    pub fn with_base_url(
        base_url: &str,
        project_id: &str,
        subscription: &str,
        token: Option<SecretString>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::create_http_client(Some(PULL_TIMEOUT))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription: qualified_name(project_id, subscription),
            token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/v1/{}:{}", self.base_url, self.subscription, method)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<reqwest::Response, QueueError> {
        let mut request = self.client.post(self.method_url(method)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(QueueError::Transport(format!(
                "{} failed with {}",
                method,
                http::error_summary(response).await
            )));
        }
        Ok(response)
    }
}

fn qualified_name(project_id: &str, subscription: &str) -> String {
    if subscription.starts_with("projects/") {
        subscription.to_string()
    } else {
        format!("projects/{}/subscriptions/{}", project_id, subscription)
    }
}

fn extension_seconds(deadline: Duration) -> u32 {
    deadline
        .as_secs()
        .clamp(MIN_ACK_DEADLINE_SECS, MAX_ACK_DEADLINE_SECS) as u32
}

fn decode_message(received: ReceivedMessage) -> Delivery {
    let payload = match received.message.data {
        None => Payload::Bytes(Vec::new()),
        Some(data) => match BASE64.decode(data.as_bytes()) {
            Ok(bytes) => Payload::Bytes(bytes),
            Err(e) => Payload::Undecodable(format!("invalid base64 data: {}", e)),
        },
    };

    Delivery {
        ack_id: received.ack_id,
        message_id: received.message.message_id,
        payload,
        delivery_attempt: received.delivery_attempt,
    }
}

#[async_trait]
impl Subscription for PubSubSubscription {
    async fn pull(&self, max_messages: usize) -> Result<Vec<Delivery>, QueueError> {
        let response = self
            .post("pull", &PullRequest { max_messages })
            .await?;
        let body: PullResponse = response
            .json()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        debug!("Pulled {} messages", body.received_messages.len());
        Ok(body.received_messages.into_iter().map(decode_message).collect())
    }

    async fn ack(&self, ack_id: &str) -> Result<(), QueueError> {
        self.post("acknowledge", &AcknowledgeRequest { ack_ids: [ack_id] })
            .await
            .map(|_| ())
    }

    async fn nack(&self, ack_id: &str) -> Result<(), QueueError> {
        self.post(
            "modifyAckDeadline",
            &ModifyAckDeadlineRequest {
                ack_ids: [ack_id],
                ack_deadline_seconds: 0,
            },
        )
        .await
        .map(|_| ())
    }

    async fn extend(&self, ack_id: &str, deadline: Duration) -> Result<(), QueueError> {
        self.post(
            "modifyAckDeadline",
            &ModifyAckDeadlineRequest {
                ack_ids: [ack_id],
                ack_deadline_seconds: extension_seconds(deadline),
            },
        )
        .await
        .map(|_| ())
    }
}
