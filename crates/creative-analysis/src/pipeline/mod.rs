//! Per-job orchestration: the state machine, stage execution, publishing
//! and status tracking.

pub mod config;
pub mod context;
pub mod progress;
pub mod publisher;
pub mod runner;
pub mod state;
pub mod status;

pub use config::PipelineConfig;
pub use context::{PipelineContext, ResultBundle, StageReport, StageStatus};
pub use progress::{
    BroadcastProgress, JobProgressEvent, NoopProgress, ProgressBroadcaster, ProgressEvent,
    ProgressReporter,
};
pub use publisher::ResultPublisher;
pub use runner::{Collaborators, Pipeline};
pub use state::PipelineState;
pub use status::StatusTracker;
