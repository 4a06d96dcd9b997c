//! Job progress events for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::state::PipelineState;

/// Events emitted by the pipeline during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    State {
        state: PipelineState,
        message: String,
    },
    Completed,
    Skipped,
    Failed {
        state: PipelineState,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Reporter that drops every event.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Skipped,
    Failed,
}

/// Progress event as sent to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub creative_id: String,
    /// State the run was in when the event was emitted.
    pub state: PipelineState,
    pub status: JobStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fan-out of progress events to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Reporter bound to one job.
    pub fn reporter(&self, job_id: &str, creative_id: &str) -> BroadcastProgress {
        BroadcastProgress {
            job_id: job_id.to_string(),
            creative_id: creative_id.to_string(),
            state: std::sync::Mutex::new(PipelineState::Started),
            broadcaster: self.clone(),
        }
    }
}

/// Bridges pipeline events for one job to a [`ProgressBroadcaster`].
pub struct BroadcastProgress {
    job_id: String,
    creative_id: String,
    /// Last state seen, attached to terminal events.
    state: std::sync::Mutex<PipelineState>,
    broadcaster: ProgressBroadcaster,
}

impl BroadcastProgress {
    fn event(
        &self,
        state: PipelineState,
        status: JobStatus,
        message: String,
        error: Option<String>,
    ) -> JobProgressEvent {
        JobProgressEvent {
            job_id: self.job_id.clone(),
            creative_id: self.creative_id.clone(),
            state,
            status,
            message,
            timestamp: Utc::now(),
            error,
        }
    }

    fn last_state(&self) -> PipelineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PipelineState::Started)
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        let event = match event {
            ProgressEvent::State { state, message } => {
                if let Ok(mut guard) = self.state.lock() {
                    *guard = state;
                }
                self.event(state, JobStatus::Processing, message, None)
            }
            ProgressEvent::Completed => self.event(
                PipelineState::Done,
                JobStatus::Completed,
                "Analysis completed".to_string(),
                None,
            ),
            ProgressEvent::Skipped => self.event(
                self.last_state(),
                JobStatus::Skipped,
                "Already analyzed".to_string(),
                None,
            ),
            ProgressEvent::Failed { state, error } => self.event(
                state,
                JobStatus::Failed,
                "Analysis failed".to_string(),
                Some(error),
            ),
        };
        self.broadcaster.send(event);
    }
}
