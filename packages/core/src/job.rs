//! Job domain types for work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
///
/// Each status doubles as the name of the state list the job is a member of,
/// so a job's status and its list membership are always the same value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker.
    #[default]
    Pending,
    /// Claimed by a worker and being executed.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed permanently.
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is an allowed edge of the state machine.
    ///
    /// `Failed -> Pending` is only taken by an explicit manual retry.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
                | (JobStatus::Failed, JobStatus::Pending)
        )
    }

    /// Get a simple status string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse a status from its storage string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a job-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobErrorKind {
    /// The processor returned an error or panicked.
    ProcessorError,
    /// The processor did not finish within its timeout.
    Timeout,
    /// No processor is bound to the job's type.
    UnregisteredType,
    /// The claim outlived its lease window.
    Stalled,
}

impl JobErrorKind {
    /// Whether a failure of this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobErrorKind::UnregisteredType)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::ProcessorError => "processor-error",
            JobErrorKind::Timeout => "timeout",
            JobErrorKind::UnregisteredType => "unregistered-type",
            JobErrorKind::Stalled => "stalled",
        }
    }
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last error recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Name of the queue this job belongs to.
    pub queue: String,
    /// Type of job (used for routing to processors).
    pub job_type: String,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// Current status, equal to the state list holding the job.
    pub status: JobStatus,
    /// Number of processing attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Ceiling on processing attempts.
    pub max_attempts: u32,
    /// Per-job processor timeout, overriding the queue default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// Earliest time a worker may claim the job.
    pub available_at: DateTime<Utc>,
    /// When the current claim was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// Worker holding the current claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    /// Processor output, present once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Last recorded error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            timeout_secs: None,
            created_at: now,
            updated_at: now,
            available_at: now,
            claimed_at: None,
            claimed_by: None,
            result: None,
            error: None,
        }
    }

    /// Set the max attempts for this job.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the timeout for this job.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Delay the first claim until `available_at`.
    pub fn available_at(mut self, available_at: DateTime<Utc>) -> Self {
        self.available_at = available_at;
        self
    }

    /// Whether another attempt is allowed after the attempts made so far.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether the job is claimable at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.available_at <= now
    }

    /// Whether the current claim matches the given worker and claim time.
    pub fn is_claimed_by(&self, worker_id: &str, claimed_at: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.claimed_by.as_deref() == Some(worker_id)
            && self.claimed_at == Some(claimed_at)
    }

    /// Drop claim bookkeeping when leaving `processing`.
    pub fn release_claim(&mut self) {
        self.claimed_at = None;
        self.claimed_by = None;
    }
}
