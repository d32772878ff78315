//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and JobError for work items
//! - QueueConfig, Backoff and QueueStats for queues
//! - Events for lifecycle observability

mod events;
mod job;
mod queue;

pub use events::JobEvent;
pub use job::{Job, JobError, JobErrorKind, JobId, JobStatus};
pub use queue::{Backoff, DEFAULT_BACKOFF_CAP, QueueConfig, QueueStats};
