//! Queue intake: pulls job messages, runs them through the pipeline with
//! bounded concurrency and settles each delivery once its job finished.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::pipeline::{NoopProgress, Pipeline, ProgressBroadcaster};
use crate::queue::{Delivery, Payload, QueueError, Subscription};
use crate::sanitize;
use crate::worker::job::{Job, JobOutcome, JobRequest, JobResult};

/// Longest wait between pulls after consecutive transport errors.
const MAX_PULL_BACKOFF: Duration = Duration::from_secs(30);

/// Malformed bodies are logged up to this many bytes.
const MAX_LOGGED_BODY: usize = 200;

/// When a finished delivery is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckPolicy {
    /// Every job outcome is acknowledged; failures live in the creative's
    /// status instead of being redelivered.
    #[default]
    Always,
    /// Transfer failures are handed back to the queue for redelivery.
    NackTransient,
}

impl AckPolicy {
    pub fn decide(&self, result: &JobResult) -> AckDecision {
        match self {
            AckPolicy::Always => AckDecision::Ack,
            AckPolicy::NackTransient if result.is_transient_failure() => AckDecision::Nack,
            AckPolicy::NackTransient => AckDecision::Ack,
        }
    }
}

impl FromStr for AckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(AckPolicy::Always),
            "nack-transient" | "nack_transient" => Ok(AckPolicy::NackTransient),
            other => Err(format!(
                "expected 'always' or 'nack-transient', got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for AckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckPolicy::Always => f.write_str("always"),
            AckPolicy::NackTransient => f.write_str("nack-transient"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Jobs allowed in flight at once.
    pub concurrency: usize,
    /// Wait after an empty pull.
    pub poll_interval: Duration,
    pub ack_policy: AckPolicy,
    /// Lease requested for a running job. Extended every half deadline
    /// until the job settles.
    pub ack_deadline: Duration,
}

impl IntakeConfig {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            ack_policy: config.ack_policy,
            ack_deadline: Duration::from_secs(config.ack_deadline_secs),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            ack_policy: AckPolicy::Always,
            ack_deadline: Duration::from_secs(60),
        }
    }
}

/// Counters for one run of the intake loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeStats {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Malformed payloads acknowledged without running a job.
    pub dropped: u64,
    pub panicked: u64,
    pub acked: u64,
    pub nacked: u64,
    pub settle_errors: u64,
}

enum TaskOutcome {
    Finished(JobResult),
    Panicked(String),
}

/// Result of one spawned job, carried back to the loop for settlement.
struct Settlement {
    ack_id: String,
    message_id: String,
    creative_id: String,
    outcome: TaskOutcome,
}

pub struct IntakeLoop {
    subscription: Arc<dyn Subscription>,
    pipeline: Arc<Pipeline>,
    config: IntakeConfig,
    progress: Option<ProgressBroadcaster>,
}

impl IntakeLoop {
    pub fn new(
        subscription: Arc<dyn Subscription>,
        pipeline: Arc<Pipeline>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            subscription,
            pipeline,
            config,
            progress: None,
        }
    }

    /// Streams per-job progress events to `broadcaster`.
    pub fn with_progress(mut self, broadcaster: ProgressBroadcaster) -> Self {
        self.progress = Some(broadcaster);
        self
    }

    /// Runs until `shutdown` turns true, its sender is dropped, or the
    /// subscription closes. In-flight jobs are always drained before this
    /// returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> IntakeStats {
        let mut stats = IntakeStats::default();
        let mut tasks: JoinSet<Settlement> = JoinSet::new();
        let mut backoff = self.config.poll_interval;

        info!(
            concurrency = self.config.concurrency,
            ack_policy = %self.config.ack_policy,
            "Intake loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Some(joined) = tasks.try_join_next() {
                self.settle(joined, &mut stats).await;
            }

            let capacity = self.config.concurrency.saturating_sub(tasks.len());
            if capacity == 0 {
                if !self
                    .wait(self.config.poll_interval, &mut tasks, &mut shutdown, &mut stats)
                    .await
                {
                    break;
                }
                continue;
            }

            let pulled = tokio::select! {
                pulled = self.subscription.pull(capacity) => pulled,
                _ = shutdown.changed() => break,
            };

            match pulled {
                Ok(batch) if batch.is_empty() => {
                    backoff = self.config.poll_interval;
                    if !self
                        .wait(self.config.poll_interval, &mut tasks, &mut shutdown, &mut stats)
                        .await
                    {
                        break;
                    }
                }
                Ok(batch) => {
                    backoff = self.config.poll_interval;
                    debug!("Pulled {} deliveries", batch.len());
                    for delivery in batch {
                        if *shutdown.borrow() {
                            // Pulled but never started: hand it back
                            stats.received += 1;
                            self.settle_delivery(&delivery.ack_id, AckDecision::Nack, &mut stats)
                                .await;
                            continue;
                        }
                        self.dispatch(delivery, &mut tasks, &mut stats).await;
                    }
                }
                Err(QueueError::Closed) => {
                    info!("Subscription closed");
                    break;
                }
                Err(e) => {
                    warn!(retry_in_ms = backoff.as_millis() as u64, "Pull failed: {}", e);
                    if !self.wait(backoff, &mut tasks, &mut shutdown, &mut stats).await {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_PULL_BACKOFF);
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Draining in-flight jobs");
        }
        while let Some(joined) = tasks.join_next().await {
            self.settle(joined, &mut stats).await;
        }

        info!(
            received = stats.received,
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            dropped = stats.dropped,
            acked = stats.acked,
            nacked = stats.nacked,
            "Intake loop stopped"
        );
        stats
    }

    /// Sleeps for `delay` while settling any job that finishes meanwhile.
    /// Returns false when shutdown was requested.
    async fn wait(
        &self,
        delay: Duration,
        tasks: &mut JoinSet<Settlement>,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut IntakeStats,
    ) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            Some(joined) = tasks.join_next() => {
                self.settle(joined, stats).await;
                true
            }
            _ = shutdown.changed() => false,
        }
    }

    async fn dispatch(
        &self,
        delivery: Delivery,
        tasks: &mut JoinSet<Settlement>,
        stats: &mut IntakeStats,
    ) {
        stats.received += 1;

        let body = match &delivery.payload {
            Payload::Bytes(body) => body,
            Payload::Undecodable(reason) => {
                warn!(message_id = %delivery.message_id, "Undecodable message envelope: {}", reason);
                self.settle_delivery(&delivery.ack_id, AckDecision::Nack, stats)
                    .await;
                return;
            }
        };

        let request = match JobRequest::decode(body) {
            Ok(request) => request,
            Err(e) => {
                error!(
                    message_id = %delivery.message_id,
                    body = %sanitize::truncate_body(&String::from_utf8_lossy(body), MAX_LOGGED_BODY),
                    "Dropping malformed message: {}", e
                );
                stats.dropped += 1;
                self.settle_delivery(&delivery.ack_id, AckDecision::Ack, stats)
                    .await;
                return;
            }
        };

        let job = Job::from_request(request, delivery.delivery_attempt);
        info!(
            message_id = %delivery.message_id,
            creative_id = %job.creative_id,
            job_id = %job.job_id,
            delivery_attempt = ?job.delivery_attempt,
            "Received job"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let subscription = Arc::clone(&self.subscription);
        let ack_deadline = self.config.ack_deadline;
        let progress = self.progress.clone();
        let ack_id = delivery.ack_id;
        let message_id = delivery.message_id;
        let creative_id = job.creative_id.clone();

        tasks.spawn(async move {
            let lease = tokio::spawn(keep_lease(subscription, ack_id.clone(), ack_deadline));

            // A panicking job must still come back with its ack id
            let handle = tokio::spawn(async move {
                match progress {
                    Some(broadcaster) => {
                        let reporter =
                            broadcaster.reporter(&job.job_id.to_string(), &job.creative_id);
                        pipeline.run(job, &reporter).await.0
                    }
                    None => pipeline.run(job, &NoopProgress).await.0,
                }
            });

            let outcome = match handle.await {
                Ok(result) => TaskOutcome::Finished(result),
                Err(e) => TaskOutcome::Panicked(e.to_string()),
            };

            lease.abort();
            let _ = lease.await;

            Settlement {
                ack_id,
                message_id,
                creative_id,
                outcome,
            }
        });
    }

    async fn settle(&self, joined: Result<Settlement, JoinError>, stats: &mut IntakeStats) {
        let settlement = match joined {
            Ok(settlement) => settlement,
            Err(e) => {
                error!("Intake task ended abnormally: {}", e);
                return;
            }
        };

        let decision = match &settlement.outcome {
            TaskOutcome::Finished(result) => {
                match result.outcome {
                    JobOutcome::Completed => stats.completed += 1,
                    JobOutcome::Failed => stats.failed += 1,
                    JobOutcome::Skipped => stats.skipped += 1,
                }
                self.config.ack_policy.decide(result)
            }
            TaskOutcome::Panicked(reason) => {
                stats.panicked += 1;
                error!(
                    message_id = %settlement.message_id,
                    creative_id = %settlement.creative_id,
                    "Job panicked: {}", reason
                );
                AckDecision::Ack
            }
        };

        debug!(
            message_id = %settlement.message_id,
            creative_id = %settlement.creative_id,
            decision = ?decision,
            "Settling delivery"
        );
        self.settle_delivery(&settlement.ack_id, decision, stats)
            .await;
    }

    async fn settle_delivery(&self, ack_id: &str, decision: AckDecision, stats: &mut IntakeStats) {
        let result = match decision {
            AckDecision::Ack => self.subscription.ack(ack_id).await,
            AckDecision::Nack => self.subscription.nack(ack_id).await,
        };

        match result {
            Ok(()) => match decision {
                AckDecision::Ack => stats.acked += 1,
                AckDecision::Nack => stats.nacked += 1,
            },
            Err(e) => {
                stats.settle_errors += 1;
                warn!(ack_id = %ack_id, decision = ?decision, "Failed to settle delivery: {}", e);
            }
        }
    }
}

/// Extends the lease on `ack_id` every half deadline until aborted.
async fn keep_lease(subscription: Arc<dyn Subscription>, ack_id: String, deadline: Duration) {
    let mut ticker = tokio::time::interval((deadline / 2).max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match subscription.extend(&ack_id, deadline).await {
            Ok(()) => debug!(ack_id = %ack_id, deadline_secs = deadline.as_secs(), "Extended lease"),
            Err(e) => warn!(ack_id = %ack_id, "Failed to extend lease: {}", e),
        }
    }
}
