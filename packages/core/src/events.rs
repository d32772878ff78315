//! Event types emitted on job lifecycle transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobErrorKind, JobId};

/// Events emitted by the job queue system for external logging and alerting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A new job was enqueued.
    JobEnqueued {
        job_id: JobId,
        queue: String,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobClaimed {
        job_id: JobId,
        queue: String,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        queue: String,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A processing attempt failed.
    JobFailed {
        job_id: JobId,
        queue: String,
        kind: JobErrorKind,
        error: String,
        attempts: u32,
        will_retry: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A failed job was put back into pending.
    JobRetrying {
        job_id: JobId,
        queue: String,
        attempt: u32,
        available_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// An operator reissued a terminally failed job.
    JobManuallyRetried {
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// The monitor reclaimed a job whose lease expired.
    JobStalled {
        job_id: JobId,
        queue: String,
        worker_id: Option<String>,
        attempts: u32,
        claimed_for_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The scheduler enqueued a job for a recurring entry.
    ScheduleFired {
        entry: String,
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobEnqueued { timestamp, .. } => *timestamp,
            JobEvent::JobClaimed { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::JobRetrying { timestamp, .. } => *timestamp,
            JobEvent::JobManuallyRetried { timestamp, .. } => *timestamp,
            JobEvent::JobStalled { timestamp, .. } => *timestamp,
            JobEvent::ScheduleFired { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue name associated with this event.
    pub fn queue(&self) -> &str {
        match self {
            JobEvent::JobEnqueued { queue, .. } => queue,
            JobEvent::JobClaimed { queue, .. } => queue,
            JobEvent::JobCompleted { queue, .. } => queue,
            JobEvent::JobFailed { queue, .. } => queue,
            JobEvent::JobRetrying { queue, .. } => queue,
            JobEvent::JobManuallyRetried { queue, .. } => queue,
            JobEvent::JobStalled { queue, .. } => queue,
            JobEvent::ScheduleFired { queue, .. } => queue,
        }
    }

    /// Get the job ID associated with this event.
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobEnqueued { job_id, .. } => *job_id,
            JobEvent::JobClaimed { job_id, .. } => *job_id,
            JobEvent::JobCompleted { job_id, .. } => *job_id,
            JobEvent::JobFailed { job_id, .. } => *job_id,
            JobEvent::JobRetrying { job_id, .. } => *job_id,
            JobEvent::JobManuallyRetried { job_id, .. } => *job_id,
            JobEvent::JobStalled { job_id, .. } => *job_id,
            JobEvent::ScheduleFired { job_id, .. } => *job_id,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobEnqueued {
                job_id, job_type, ..
            } => format!("Job {} ({}) enqueued", job_id, job_type),
            JobEvent::JobClaimed {
                job_id,
                worker_id,
                attempt,
                ..
            } => format!("Job {} claimed by {} (attempt {})", job_id, worker_id, attempt),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                kind,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed [{}]: {}{}", job_id, kind, error, retry)
            }
            JobEvent::JobRetrying {
                job_id, attempt, ..
            } => format!("Job {} retrying (attempt {})", job_id, attempt),
            JobEvent::JobManuallyRetried { job_id, .. } => {
                format!("Job {} manually retried", job_id)
            }
            JobEvent::JobStalled {
                job_id,
                claimed_for_ms,
                ..
            } => format!("Job {} stalled after {}ms", job_id, claimed_for_ms),
            JobEvent::ScheduleFired { entry, job_id, .. } => {
                format!("Schedule '{}' fired job {}", entry, job_id)
            }
        }
    }
}
