//! Reclaims jobs whose claim outlived the lease window.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{JobStore, StoreError};
use queue_core::{JobError, JobErrorKind, JobEvent, JobId, JobStatus};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::events::EventBus;
use crate::messages::MonitorMessage;
use crate::registry::QueueRegistry;
use crate::retry::{Claim, FailureOutcome, RetryPolicy};

/// Scans the `processing` list of every registered queue and routes expired
/// claims through the queue's retry policy, exactly as a processor failure.
///
/// A reclaim only applies if the claim seen during the scan is still the
/// current one, so a job that completes concurrently is left alone.
pub struct StalledJobMonitor<S> {
    store: Arc<S>,
    registry: Arc<QueueRegistry>,
    events: EventBus,
    lease_window: Duration,
}

impl<S: JobStore> StalledJobMonitor<S> {
    pub fn new(store: Arc<S>, registry: Arc<QueueRegistry>, events: EventBus, lease_window: Duration) -> Self {
        Self {
            store,
            registry,
            events,
            lease_window,
        }
    }

    pub fn lease_window(&self) -> Duration {
        self.lease_window
    }

    /// Reclaim every job with `now - claimed_at > lease_window`.
    pub async fn reclaim(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        let mut reclaimed = Vec::new();

        for queue in self.registry.queues() {
            let policy = RetryPolicy::new(queue.backoff);

            for id in self.store.scan_list(&queue.name, JobStatus::Processing).await? {
                let Some(job) = self.store.get_job(id).await? else {
                    continue;
                };
                if job.status != JobStatus::Processing {
                    continue;
                }
                let Some(claim) = Claim::of(&job) else {
                    tracing::warn!(job_id = %id, queue = %queue.name, "processing job without claim token");
                    continue;
                };

                let Ok(claimed_for) = now.signed_duration_since(claim.claimed_at).to_std() else {
                    continue;
                };
                if claimed_for <= self.lease_window {
                    continue;
                }

                let claimed_for_ms = u64::try_from(claimed_for.as_millis()).unwrap_or(u64::MAX);
                let error = JobError::new(
                    JobErrorKind::Stalled,
                    format!(
                        "claim by {} expired after {}s",
                        claim.worker_id,
                        claimed_for.as_secs()
                    ),
                );

                let outcome = policy
                    .record_failure(self.store.as_ref(), &self.events, &job, &claim, error, now, claimed_for_ms)
                    .await?;
                if outcome == FailureOutcome::Lost {
                    continue;
                }

                self.events.emit(JobEvent::JobStalled {
                    job_id: id,
                    queue: queue.name.clone(),
                    worker_id: Some(claim.worker_id),
                    attempts: job.attempts + 1,
                    claimed_for_ms,
                    timestamp: now,
                });
                reclaimed.push(id);
            }
        }

        Ok(reclaimed)
    }
}

/// Monitor actor arguments.
pub struct MonitorArgs<S> {
    pub monitor: StalledJobMonitor<S>,
    pub interval: Duration,
}

/// Actor running the [`StalledJobMonitor`] on a fixed interval.
pub struct MonitorActor<S>(PhantomData<fn() -> S>);

impl<S> MonitorActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for MonitorActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for MonitorActor<S> {
    type Msg = MonitorMessage;
    type State = StalledJobMonitor<S>;
    type Arguments = MonitorArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            lease_window_secs = args.monitor.lease_window().as_secs(),
            interval_secs = args.interval.as_secs(),
            "starting stalled-job monitor"
        );

        let myself_clone = myself.clone();
        let period = args.interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                if myself_clone.send_message(MonitorMessage::Scan).is_err() {
                    break;
                }
            }
        });

        Ok(args.monitor)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            MonitorMessage::Scan => match state.reclaim(Utc::now()).await {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    tracing::info!(count = reclaimed.len(), "reclaimed stalled jobs");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "stalled-job scan failed; retrying next interval");
                }
            },

            MonitorMessage::Shutdown => {
                tracing::info!("shutting down stalled-job monitor");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
