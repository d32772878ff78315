//! The durable store contract shared by every backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobStatus, QueueStats};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    Backend(#[from] surrealdb::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Job already exists: {0}")]
    Duplicate(JobId),
    #[error("Job {id}: {from} -> {to} is not an allowed transition")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("Write conflict on job {0}")]
    Conflict(JobId),
}

impl StoreError {
    /// Whether the backing store could not be reached. Callers back off
    /// before the next store call instead of treating this as a job failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Backend(_))
    }
}

/// Durable store adapter for job records and their state lists.
///
/// Every queue owns four ordered lists named after [`JobStatus`]. A job is a
/// member of exactly one of them, and its `status` always equals that list:
/// both are written by the same atomic operation.
pub trait JobStore: Send + Sync + 'static {
    /// Persist a new record and append its id to the tail of the list named
    /// by its status (normally `pending`).
    fn create_job(&self, job: &Job) -> impl Future<Output = Result<JobId, StoreError>> + Send;

    /// Load a record.
    fn get_job(&self, id: JobId) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Mutate a record in place without changing its list.
    ///
    /// The mutator may decline by returning `false`, in which case nothing is
    /// written and `None` is returned. Status changes made by the mutator are
    /// discarded; use [`JobStore::move_job`] for transitions.
    fn update_job<F>(
        &self,
        id: JobId,
        mutate: F,
    ) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send
    where
        F: Fn(&mut Job) -> bool + Send + Sync;

    /// Atomically move a job from list `from` to the tail of list `to`,
    /// applying `mutate` in the same step.
    ///
    /// Returns the updated record iff the job was in `from` and the mutator
    /// accepted it. `None` means another actor moved it first. The mutator
    /// may run more than once when the backend retries an optimistic write.
    fn move_job<F>(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        mutate: F,
    ) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send
    where
        F: Fn(&mut Job) -> bool + Send + Sync;

    /// Claim the oldest due job in `queue`'s pending list, moving it to
    /// `processing` with `claimed_at = now` and `claimed_by = worker_id`.
    fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Ids in a state list, head first.
    fn scan_list(
        &self,
        queue: &str,
        list: JobStatus,
    ) -> impl Future<Output = Result<Vec<JobId>, StoreError>> + Send;

    /// Records in a state list, head first, at most `limit`.
    fn list_jobs(
        &self,
        queue: &str,
        list: JobStatus,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// Remove a record and its list membership. Returns whether it existed.
    fn delete_job(&self, id: JobId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Count jobs per state list.
    fn queue_stats(&self, queue: &str)
    -> impl Future<Output = Result<QueueStats, StoreError>> + Send;
}

/// Apply a claim to a pending job, refusing jobs that are not yet due.
pub(crate) fn apply_claim(job: &mut Job, worker_id: &str, now: DateTime<Utc>) -> bool {
    if !job.is_due(now) {
        return false;
    }
    job.claimed_at = Some(now);
    job.claimed_by = Some(worker_id.to_string());
    true
}

/// Reject moves that are not edges of the job state machine.
pub(crate) fn check_transition(id: JobId, from: JobStatus, to: JobStatus) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { id, from, to })
    }
}

/// Add one list's count to a stats record.
pub(crate) fn add_count(stats: &mut QueueStats, list: JobStatus, count: u64) {
    match list {
        JobStatus::Pending => stats.pending += count,
        JobStatus::Processing => stats.processing += count,
        JobStatus::Completed => stats.completed += count,
        JobStatus::Failed => stats.failed += count,
    }
}
