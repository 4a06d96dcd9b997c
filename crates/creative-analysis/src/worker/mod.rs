pub mod intake;
pub mod job;

pub use intake::{AckDecision, AckPolicy, IntakeConfig, IntakeLoop, IntakeStats};
pub use job::{DecodeError, Job, JobOutcome, JobRequest, JobResult};
