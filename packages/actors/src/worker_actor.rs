//! Worker actor driving a [`Worker`] by self-messages.

use std::marker::PhantomData;
use std::time::Duration;

use db::JobStore;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::WorkerMessage;
use crate::worker::Worker;

/// State for the worker actor.
pub struct WorkerActorState<S> {
    worker: Worker<S>,
    poll_interval: Duration,
    store_backoff: Duration,
    /// Jobs claimed since start, whatever their outcome.
    processed: u64,
}

/// Worker actor arguments.
pub struct WorkerArgs<S> {
    pub worker: Worker<S>,
    pub poll_interval: Duration,
    pub store_backoff: Duration,
}

/// Worker actor that claims and processes jobs from one queue.
///
/// The actor handles one message at a time, so a `Shutdown` that arrives
/// while a job is running is only seen after that job's outcome is recorded.
pub struct WorkerActor<S>(PhantomData<fn() -> S>);

impl<S> WorkerActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for WorkerActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver `Poll` to `myself` after `delay`.
fn poll_after(myself: &ActorRef<WorkerMessage>, delay: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // The actor may have stopped in the meantime.
        let _ = myself.send_message(WorkerMessage::Poll);
    });
}

impl<S: JobStore> Actor for WorkerActor<S> {
    type Msg = WorkerMessage;
    type State = WorkerActorState<S>;
    type Arguments = WorkerArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            worker_id = %args.worker.id(),
            queue = %args.worker.queue(),
            "starting worker"
        );
        myself.send_message(WorkerMessage::Poll)?;

        Ok(WorkerActorState {
            worker: args.worker,
            poll_interval: args.poll_interval,
            store_backoff: args.store_backoff,
            processed: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => match state.worker.tick().await {
                Ok(Some(_)) => {
                    state.processed += 1;
                    // Keep draining while there is work.
                    myself.send_message(WorkerMessage::Poll)?;
                }
                Ok(None) => poll_after(&myself, state.poll_interval),
                Err(e) => {
                    tracing::warn!(
                        worker_id = %state.worker.id(),
                        queue = %state.worker.queue(),
                        error = %e,
                        backoff_ms = state.store_backoff.as_millis() as u64,
                        "store call failed; backing off"
                    );
                    poll_after(&myself, state.store_backoff);
                }
            },

            WorkerMessage::Shutdown => {
                tracing::info!(
                    worker_id = %state.worker.id(),
                    processed = state.processed,
                    "shutting down worker"
                );
                myself.stop(None);
            }
        }

        Ok(())
    }
}
