//! Enqueue-side API: create jobs, inspect them and reissue failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::JobStore;
use queue_core::{Job, JobEvent, JobId, JobStatus, QueueStats};
use serde_json::Value;

use crate::error::{QueueError, QueueResult};
use crate::events::EventBus;
use crate::registry::QueueRegistry;
use crate::retry::after;

/// Per-job overrides for [`Producer::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Ceiling on attempts; defaults to the queue's `max_attempts`.
    pub max_attempts: Option<u32>,
    /// Processor timeout; defaults to the queue's timeout.
    pub timeout: Option<Duration>,
    /// Delay before the first claim.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Handle used by application code to submit and manage jobs.
pub struct Producer<S> {
    store: Arc<S>,
    registry: Arc<QueueRegistry>,
    events: EventBus,
    lease_window: Option<Duration>,
}

impl<S> Clone for Producer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            lease_window: self.lease_window,
        }
    }
}

impl<S: JobStore> Producer<S> {
    pub fn new(store: Arc<S>, registry: Arc<QueueRegistry>, events: EventBus) -> Self {
        Self {
            store,
            registry,
            events,
            lease_window: None,
        }
    }

    /// Reject per-job timeouts that would outlast a claim's lease.
    pub fn with_lease_window(mut self, lease_window: Duration) -> Self {
        self.lease_window = Some(lease_window);
        self
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a pending job and return its id without waiting for it to run.
    ///
    /// The queue must be registered and the type must have a bound
    /// processor; otherwise nothing is stored.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<JobId> {
        let config = self
            .registry
            .queue(queue)
            .ok_or_else(|| QueueError::validation(format!("unknown queue '{}'", queue)))?;
        if !self.registry.has_processor(queue, job_type) {
            return Err(QueueError::validation(format!(
                "no processor registered for '{}' on queue '{}'",
                job_type, queue
            )));
        }

        let max_attempts = options.max_attempts.unwrap_or(config.max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::validation("max_attempts must be at least 1"));
        }

        let mut job = Job::new(queue, job_type, payload).with_max_attempts(max_attempts);
        if let Some(timeout) = options.timeout {
            let secs = timeout.as_secs().max(1);
            if let Some(lease) = self.lease_window.filter(|lease| Duration::from_secs(secs) >= *lease) {
                return Err(QueueError::validation(format!(
                    "timeout of {}s must be shorter than the {}s lease window",
                    secs,
                    lease.as_secs()
                )));
            }
            job = job.with_timeout(secs);
        }
        if let Some(delay) = options.delay {
            let available_at = after(job.created_at, delay);
            job = job.available_at(available_at);
        }

        let id = self.store.create_job(&job).await?;
        self.events.emit(JobEvent::JobEnqueued {
            job_id: id,
            queue: job.queue,
            job_type: job.job_type,
            timestamp: job.created_at,
        });
        Ok(id)
    }

    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.store.get_job(id).await?)
    }

    /// Reissue a terminally failed job: attempts reset to zero, error
    /// cleared, eligible immediately.
    pub async fn retry_job(&self, id: JobId) -> QueueResult<Job> {
        let now = Utc::now();
        let moved = self
            .store
            .move_job(id, JobStatus::Failed, JobStatus::Pending, |job| {
                job.attempts = 0;
                job.error = None;
                job.result = None;
                job.available_at = now;
                job.updated_at = now;
                true
            })
            .await?;

        match moved {
            Some(job) => {
                self.events.emit(JobEvent::JobManuallyRetried {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    timestamp: now,
                });
                Ok(job)
            }
            None => Err(self.not_in(id, "retried").await),
        }
    }

    /// Move a pending job's eligibility time.
    pub async fn reschedule(&self, id: JobId, at: DateTime<Utc>) -> QueueResult<Job> {
        let updated = self
            .store
            .update_job(id, |job| {
                if job.status != JobStatus::Pending {
                    return false;
                }
                job.available_at = at;
                job.updated_at = Utc::now();
                true
            })
            .await?;

        match updated {
            Some(job) => {
                tracing::debug!(job_id = %id, %at, "rescheduled job");
                Ok(job)
            }
            None => Err(self.not_in(id, "rescheduled").await),
        }
    }

    pub async fn list_jobs(&self, queue: &str, status: JobStatus, limit: usize) -> QueueResult<Vec<Job>> {
        Ok(self.store.list_jobs(queue, status, limit).await?)
    }

    pub async fn queue_stats(&self, queue: &str) -> QueueResult<QueueStats> {
        Ok(self.store.queue_stats(queue).await?)
    }

    /// Delete terminal jobs last touched before `older_than`. Returns the
    /// number of records removed.
    pub async fn purge(&self, queue: &str, status: JobStatus, older_than: DateTime<Utc>) -> QueueResult<usize> {
        purge_jobs(self.store.as_ref(), queue, status, older_than).await
    }

    /// Explain why a conditional write on `id` did not apply.
    async fn not_in(&self, id: JobId, action: &'static str) -> QueueError {
        match self.store.get_job(id).await {
            Ok(Some(job)) => QueueError::InvalidState {
                id,
                status: job.status,
                action,
            },
            Ok(None) => QueueError::JobNotFound(id),
            Err(e) => e.into(),
        }
    }
}

/// Delete `completed` or `failed` jobs of `queue` whose last update is older
/// than `older_than`.
///
/// Usable without a [`Producer`], e.g. from a maintenance processor that
/// only holds the store.
pub async fn purge_jobs<S: JobStore>(
    store: &S,
    queue: &str,
    status: JobStatus,
    older_than: DateTime<Utc>,
) -> QueueResult<usize> {
    if !status.is_terminal() {
        return Err(QueueError::validation(format!(
            "only completed or failed jobs can be purged, not {}",
            status
        )));
    }

    let mut removed = 0;
    for id in store.scan_list(queue, status).await? {
        let Some(job) = store.get_job(id).await? else {
            continue;
        };
        if job.status == status && job.updated_at < older_than && store.delete_job(id).await? {
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!(%queue, %status, removed, "purged jobs");
    }
    Ok(removed)
}
