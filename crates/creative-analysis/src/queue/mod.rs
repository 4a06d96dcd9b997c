//! Queue transports that deliver job messages.

pub mod channel;
pub mod pubsub;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use channel::{ChannelPublisher, ChannelSubscription};
pub use pubsub::PubSubSubscription;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue transport error: {0}")]
    Transport(String),

    #[error("Subscription closed")]
    Closed,
}

/// Message body as received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    /// The transport envelope itself could not be decoded.
    Undecodable(String),
}

/// One leased message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub ack_id: String,
    pub message_id: String,
    pub payload: Payload,
    pub delivery_attempt: Option<u32>,
}

/// Pull-based subscription with explicit settlement.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Leases up to `max_messages` deliveries. An empty result means nothing
    /// is available right now.
    async fn pull(&self, max_messages: usize) -> Result<Vec<Delivery>, QueueError>;

    async fn ack(&self, ack_id: &str) -> Result<(), QueueError>;

    /// Releases the lease so the transport can redeliver.
    async fn nack(&self, ack_id: &str) -> Result<(), QueueError>;

    /// Pushes the lease deadline `deadline` past now, keeping a delivery
    /// whose job is still running from being redelivered.
    async fn extend(&self, ack_id: &str, deadline: Duration) -> Result<(), QueueError>;
}
