//! Routing of failed attempts: back to pending after a delay, or terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{JobStore, StoreError};
use queue_core::{Backoff, Job, JobError, JobEvent, JobStatus};

use crate::events::EventBus;

/// `now + delay`, saturating at the largest representable instant.
pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Identity of one claim on a job.
///
/// Every move out of `processing` checks the token, so a worker whose claim
/// was reclaimed (and possibly re-claimed by someone else) cannot overwrite
/// the newer claim's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub worker_id: String,
    pub claimed_at: DateTime<Utc>,
}

impl Claim {
    pub fn of(job: &Job) -> Option<Self> {
        Some(Self {
            worker_id: job.claimed_by.clone()?,
            claimed_at: job.claimed_at?,
        })
    }

    pub fn matches(&self, job: &Job) -> bool {
        job.is_claimed_by(&self.worker_id, self.claimed_at)
    }
}

/// What happened to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back in pending, claimable from `available_at`.
    Retrying { available_at: DateTime<Utc> },
    /// Terminally failed.
    Failed,
    /// The claim was no longer current; nothing was written.
    Lost,
}

/// Applies a queue's backoff to failed attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    /// When the next attempt may start, or `None` if the failure is terminal.
    ///
    /// `attempts` counts the attempt that just failed.
    pub fn next_attempt(
        &self,
        attempts: u32,
        max_attempts: u32,
        error: &JobError,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !error.kind.is_retryable() || attempts >= max_attempts {
            return None;
        }
        Some(after(now, self.backoff.delay(attempts)))
    }

    /// Record a failed attempt of `job` under `claim` and route it.
    ///
    /// `job` is the snapshot taken at claim time. The attempt counter is
    /// incremented in the same atomic move that records the error.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_failure<S: JobStore>(
        &self,
        store: &S,
        events: &EventBus,
        job: &Job,
        claim: &Claim,
        error: JobError,
        now: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<FailureOutcome, StoreError> {
        let attempts = job.attempts + 1;
        let next = self.next_attempt(attempts, job.max_attempts, &error, now);
        let target = if next.is_some() {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };

        let moved = store
            .move_job(job.id, JobStatus::Processing, target, |record| {
                if !claim.matches(record) {
                    return false;
                }
                record.attempts += 1;
                record.error = Some(error.clone());
                record.release_claim();
                record.updated_at = now;
                if let Some(available_at) = next {
                    record.available_at = available_at;
                }
                true
            })
            .await?;

        let Some(record) = moved else {
            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                worker_id = %claim.worker_id,
                "claim no longer current; dropping failure"
            );
            return Ok(FailureOutcome::Lost);
        };

        events.emit(JobEvent::JobFailed {
            job_id: record.id,
            queue: record.queue.clone(),
            kind: error.kind,
            error: error.message.clone(),
            attempts: record.attempts,
            will_retry: next.is_some(),
            duration_ms,
            timestamp: now,
        });

        match next {
            Some(available_at) => {
                events.emit(JobEvent::JobRetrying {
                    job_id: record.id,
                    queue: record.queue,
                    attempt: record.attempts + 1,
                    available_at,
                    timestamp: now,
                });
                Ok(FailureOutcome::Retrying { available_at })
            }
            None => Ok(FailureOutcome::Failed),
        }
    }
}
