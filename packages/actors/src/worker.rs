//! One claim-process-record cycle for a queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use db::{JobStore, StoreError};
use futures_util::FutureExt;
use queue_core::{Job, JobError, JobErrorKind, JobEvent, JobId, JobStatus, QueueConfig};
use serde_json::Value;

use crate::events::EventBus;
use crate::handler::Processor;
use crate::registry::QueueRegistry;
use crate::retry::{Claim, FailureOutcome, RetryPolicy};

/// Result of a tick that claimed a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(JobId),
    Retrying(JobId),
    Failed(JobId),
    /// The claim was reclaimed before the outcome could be recorded.
    Lost(JobId),
}

impl TickOutcome {
    pub fn job_id(&self) -> JobId {
        match *self {
            TickOutcome::Completed(id)
            | TickOutcome::Retrying(id)
            | TickOutcome::Failed(id)
            | TickOutcome::Lost(id) => id,
        }
    }
}

/// A worker bound to one queue.
///
/// `tick` runs a single cycle; [`crate::WorkerActor`] drives it in a loop.
pub struct Worker<S> {
    id: String,
    queue: QueueConfig,
    store: Arc<S>,
    registry: Arc<QueueRegistry>,
    events: EventBus,
    policy: RetryPolicy,
}

impl<S: JobStore> Worker<S> {
    pub fn new(
        id: impl Into<String>,
        queue: QueueConfig,
        store: Arc<S>,
        registry: Arc<QueueRegistry>,
        events: EventBus,
    ) -> Self {
        let policy = RetryPolicy::new(queue.backoff);
        Self {
            id: id.into(),
            queue,
            store,
            registry,
            events,
            policy,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue.name
    }

    /// Claim the next due job and process it to an outcome.
    ///
    /// Returns `Ok(None)` when nothing is claimable. Job-level failures are
    /// recorded on the job; only store errors are returned.
    pub async fn tick(&self) -> Result<Option<TickOutcome>, StoreError> {
        let now = Utc::now();
        let Some(job) = self.store.claim_next(&self.queue.name, &self.id, now).await? else {
            return Ok(None);
        };
        let Some(claim) = Claim::of(&job) else {
            tracing::warn!(job_id = %job.id, worker_id = %self.id, "claimed job carries no claim token");
            return Ok(Some(TickOutcome::Lost(job.id)));
        };

        self.events.emit(JobEvent::JobClaimed {
            job_id: job.id,
            queue: job.queue.clone(),
            worker_id: self.id.clone(),
            attempt: job.attempts + 1,
            timestamp: now,
        });

        let Some(processor) = self.registry.processor(&job.queue, &job.job_type) else {
            let error = JobError::new(
                JobErrorKind::UnregisteredType,
                format!("no processor registered for '{}'", job.job_type),
            );
            return self.fail(&job, &claim, error, 0).await.map(Some);
        };

        let timeout = Duration::from_secs(job.timeout_secs.unwrap_or(self.queue.timeout_secs));
        let started = Instant::now();
        let result = run_processor(processor, job.payload.clone(), timeout).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(value) => self.complete(&job, &claim, value, duration_ms).await.map(Some),
            Err(error) => self.fail(&job, &claim, error, duration_ms).await.map(Some),
        }
    }

    async fn complete(
        &self,
        job: &Job,
        claim: &Claim,
        value: Value,
        duration_ms: u64,
    ) -> Result<TickOutcome, StoreError> {
        let now = Utc::now();
        let moved = self
            .store
            .move_job(job.id, JobStatus::Processing, JobStatus::Completed, |record| {
                if !claim.matches(record) {
                    return false;
                }
                record.attempts += 1;
                record.result = Some(value.clone());
                record.error = None;
                record.release_claim();
                record.updated_at = now;
                true
            })
            .await?;

        let Some(record) = moved else {
            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                worker_id = %self.id,
                "claim no longer current; dropping result"
            );
            return Ok(TickOutcome::Lost(job.id));
        };

        self.events.emit(JobEvent::JobCompleted {
            job_id: record.id,
            queue: record.queue,
            attempts: record.attempts,
            duration_ms,
            timestamp: now,
        });
        Ok(TickOutcome::Completed(job.id))
    }

    async fn fail(
        &self,
        job: &Job,
        claim: &Claim,
        error: JobError,
        duration_ms: u64,
    ) -> Result<TickOutcome, StoreError> {
        let outcome = self
            .policy
            .record_failure(
                self.store.as_ref(),
                &self.events,
                job,
                claim,
                error,
                Utc::now(),
                duration_ms,
            )
            .await?;

        Ok(match outcome {
            FailureOutcome::Retrying { .. } => TickOutcome::Retrying(job.id),
            FailureOutcome::Failed => TickOutcome::Failed(job.id),
            FailureOutcome::Lost => TickOutcome::Lost(job.id),
        })
    }
}

/// Invoke a processor under a timeout, turning panics into errors.
async fn run_processor(
    processor: Arc<dyn Processor>,
    payload: Value,
    timeout: Duration,
) -> Result<Value, JobError> {
    // A processor may panic while building its future, not only while polling it.
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| processor.process(payload))) {
        Ok(future) => future,
        Err(panic) => return Err(panicked(panic)),
    };

    match tokio::time::timeout(timeout, AssertUnwindSafe(future).catch_unwind()).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(message))) => Err(JobError::new(JobErrorKind::ProcessorError, message)),
        Ok(Err(panic)) => Err(panicked(panic)),
        Err(_) => Err(JobError::new(
            JobErrorKind::Timeout,
            format!("processor timed out after {:?}", timeout),
        )),
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> JobError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    JobError::new(JobErrorKind::ProcessorError, format!("processor panicked: {}", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnProcessor;
    use crate::handler::ProcessorFuture;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_processor_ok() {
        let echo: Arc<dyn Processor> = Arc::new(crate::processor!("echo", |payload| Ok(payload)));
        let result = run_processor(echo, json!({"x": 1}), Duration::from_secs(1)).await;
        assert_eq!(result, Ok(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_run_processor_panics() {
        let inside: Arc<dyn Processor> = Arc::new(FnProcessor::new("inside", |_payload: Value| -> ProcessorFuture {
            Box::pin(async move {
                if true {
                    panic!("inside the future");
                }
                Ok(Value::Null)
            })
        }));
        let err = run_processor(inside, json!({}), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, JobErrorKind::ProcessorError);
        assert!(err.message.contains("inside the future"));

        let eager: Arc<dyn Processor> = Arc::new(FnProcessor::new("eager", |_payload: Value| -> ProcessorFuture {
            panic!("before the future")
        }));
        let err = run_processor(eager, json!({}), Duration::from_secs(1)).await.unwrap_err();
        assert!(err.message.contains("before the future"));
    }

    #[tokio::test]
    async fn test_run_processor_timeout() {
        let slow: Arc<dyn Processor> = Arc::new(FnProcessor::new("slow", |_payload: Value| -> ProcessorFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            })
        }));
        let err = run_processor(slow, json!({}), Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.kind, JobErrorKind::Timeout);
    }
}
