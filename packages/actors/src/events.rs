//! Event fan-out with structured logging.

use queue_core::JobEvent;
use tokio::sync::broadcast;

/// Broadcasts lifecycle events to subscribers and mirrors each one to `tracing`.
///
/// Emitting never blocks and never fails: with no subscribers the event is
/// only logged, and slow subscribers observe `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: JobEvent) {
        log_event(&event);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn log_event(event: &JobEvent) {
    let job_id = event.job_id();
    let queue = event.queue();
    match event {
        JobEvent::JobFailed {
            kind,
            error,
            attempts,
            will_retry: false,
            duration_ms,
            ..
        } => {
            tracing::error!(%job_id, %queue, %kind, attempts, duration_ms, "job failed permanently: {}", error);
        }
        JobEvent::JobFailed {
            kind,
            error,
            attempts,
            duration_ms,
            ..
        } => {
            tracing::warn!(%job_id, %queue, %kind, attempts, duration_ms, "job attempt failed: {}", error);
        }
        JobEvent::JobRetrying {
            attempt,
            available_at,
            ..
        } => {
            tracing::warn!(%job_id, %queue, attempt, %available_at, "job scheduled for retry");
        }
        JobEvent::JobStalled {
            worker_id,
            attempts,
            claimed_for_ms,
            ..
        } => {
            tracing::warn!(
                %job_id,
                %queue,
                worker_id = worker_id.as_deref().unwrap_or("unknown"),
                attempts,
                claimed_for_ms,
                "reclaimed stalled job"
            );
        }
        JobEvent::JobCompleted {
            attempts,
            duration_ms,
            ..
        } => {
            tracing::info!(%job_id, %queue, attempts, duration_ms, "job completed");
        }
        JobEvent::JobClaimed {
            worker_id, attempt, ..
        } => {
            tracing::debug!(%job_id, %queue, %worker_id, attempt, "job claimed");
        }
        _ => {
            tracing::info!(%job_id, %queue, "{}", event.description());
        }
    }
}
