//! In-process transport backed by a tokio mpsc channel.
//!
//! Settlements are recorded rather than redelivered, which makes the
//! transport useful for embedding the worker and for observing ack behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Delivery, Payload, QueueError, Subscription};

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Delivery>,
    next_id: Arc<AtomicU64>,
}

impl ChannelPublisher {
    /// Publishes a raw message body and returns its message id.
    pub async fn publish(&self, body: impl Into<Vec<u8>>) -> Result<String, QueueError> {
        self.send(Payload::Bytes(body.into())).await
    }

    /// Publishes a message whose envelope failed to decode.
    pub async fn publish_undecodable(&self, reason: &str) -> Result<String, QueueError> {
        self.send(Payload::Undecodable(reason.to_string())).await
    }

    async fn send(&self, payload: Payload) -> Result<String, QueueError> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message_id = format!("msg-{}", n);
        let delivery = Delivery {
            ack_id: format!("ack-{}", n),
            message_id: message_id.clone(),
            payload,
            delivery_attempt: Some(1),
        };
        self.tx.send(delivery).await.map_err(|_| QueueError::Closed)?;
        Ok(message_id)
    }
}

pub struct ChannelSubscription {
    rx: tokio::sync::Mutex<mpsc::Receiver<Delivery>>,
    acked: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
    extended: Mutex<Vec<String>>,
}

impl ChannelSubscription {
    /// Creates a connected publisher/subscription pair.
    pub fn channel(capacity: usize) -> (ChannelPublisher, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let publisher = ChannelPublisher {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        let subscription = Self {
            rx: tokio::sync::Mutex::new(rx),
            acked: Mutex::new(Vec::new()),
            nacked: Mutex::new(Vec::new()),
            extended: Mutex::new(Vec::new()),
        };
        (publisher, subscription)
    }

    /// Ack ids settled with `ack`, in order.
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Ack ids settled with `nack`, in order.
    pub fn nacked(&self) -> Vec<String> {
        self.nacked.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Ack ids whose lease was extended, once per extension.
    pub fn extended(&self) -> Vec<String> {
        self.extended.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn record(list: &Mutex<Vec<String>>, ack_id: &str) -> Result<(), QueueError> {
        list.lock()
            .map_err(|_| QueueError::Transport("settlement log poisoned".to_string()))?
            .push(ack_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn pull(&self, max_messages: usize) -> Result<Vec<Delivery>, QueueError> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::new();

        while out.len() < max_messages {
            match rx.try_recv() {
                Ok(delivery) => out.push(delivery),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if out.is_empty() {
                        return Err(QueueError::Closed);
                    }
                    break;
                }
            }
        }

        Ok(out)
    }

    async fn ack(&self, ack_id: &str) -> Result<(), QueueError> {
        Self::record(&self.acked, ack_id)
    }

    async fn nack(&self, ack_id: &str) -> Result<(), QueueError> {
        Self::record(&self.nacked, ack_id)
    }

    async fn extend(&self, ack_id: &str, _deadline: Duration) -> Result<(), QueueError> {
        Self::record(&self.extended, ack_id)
    }
}
