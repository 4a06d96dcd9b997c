use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, warn};

use crate::store::{AnalysisStatus, MetadataStore, StoreError};

/// Writes `analysis_status` transitions for creatives.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn MetadataStore>,
    /// Extra attempts for the `failed` write after the first one.
    retries: u32,
    backoff: Duration,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn MetadataStore>, retries: u32, backoff: Duration) -> Self {
        Self {
            store,
            retries,
            backoff,
        }
    }

    pub async fn mark_processing(&self, creative_id: &str) -> Result<(), StoreError> {
        self.store
            .update_status(creative_id, AnalysisStatus::Processing, None)
            .await
    }

    /// Sets `completed` together with the completion timestamp.
    pub async fn mark_completed(&self, creative_id: &str) -> Result<(), StoreError> {
        self.store
            .update_status(creative_id, AnalysisStatus::Completed, Some(Utc::now()))
            .await
    }

    /// Best-effort `failed` write with linear backoff between attempts.
    /// Returns whether the write landed; errors are logged, never returned.
    pub async fn mark_failed(&self, creative_id: &str) -> bool {
        let attempts = self.retries.saturating_add(1);

        for attempt in 1..=attempts {
            match self
                .store
                .update_status(creative_id, AnalysisStatus::Failed, None)
                .await
            {
                Ok(()) => return true,
                Err(StoreError::UnknownCreative(_)) => {
                    warn!(creative_id = %creative_id, "No creative row to mark failed");
                    return false;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        creative_id = %creative_id,
                        attempt,
                        "Failed to record failed status: {}", e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    error!(
                        creative_id = %creative_id,
                        attempts,
                        "Giving up recording failed status: {}", e
                    );
                }
            }
        }

        false
    }
}
