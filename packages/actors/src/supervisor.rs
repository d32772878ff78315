//! Supervisor actor owning workers, the monitor and the scheduler.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use db::JobStore;
use queue_core::QueueConfig;
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::task::JoinHandle;

use crate::config::SystemConfig;
use crate::events::EventBus;
use crate::messages::{MonitorMessage, SchedulerMessage, SupervisorMessage, WorkerMessage};
use crate::monitor::{MonitorActor, MonitorArgs, StalledJobMonitor};
use crate::registry::QueueRegistry;
use crate::scheduler::{Scheduler, SchedulerActor, SchedulerArgs};
use crate::worker::Worker;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Supervisor arguments.
pub struct SupervisorArgs<S> {
    pub store: Arc<S>,
    pub registry: Arc<QueueRegistry>,
    pub events: EventBus,
    pub config: SystemConfig,
    /// Recurring jobs; `None` runs without a scheduler.
    pub scheduler: Option<Scheduler<S>>,
}

struct WorkerHandle {
    worker_id: String,
    queue: QueueConfig,
    actor: ActorRef<WorkerMessage>,
    handle: JoinHandle<()>,
}

/// State for the supervisor actor.
pub struct SupervisorState<S> {
    store: Arc<S>,
    registry: Arc<QueueRegistry>,
    events: EventBus,
    config: SystemConfig,
    workers: HashMap<ActorId, WorkerHandle>,
    monitor: Option<(ActorRef<MonitorMessage>, JoinHandle<()>)>,
    scheduler: Option<(ActorRef<SchedulerMessage>, JoinHandle<()>)>,
    /// Entries the scheduler was started with, kept for restarts.
    scheduler_template: Option<Scheduler<S>>,
    shutting_down: bool,
}

impl<S: JobStore> SupervisorState<S> {
    async fn spawn_worker(
        &mut self,
        supervisor: ActorCell,
        worker_id: String,
        queue: QueueConfig,
    ) -> Result<(), ActorProcessingErr> {
        let worker = Worker::new(
            worker_id.clone(),
            queue.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.events.clone(),
        );
        let args = WorkerArgs {
            worker,
            poll_interval: self.config.poll_interval,
            store_backoff: self.config.store_backoff,
        };

        let (actor, handle) = Actor::spawn_linked(None, WorkerActor::<S>::new(), args, supervisor)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker {}: {}", worker_id, e)))?;

        self.workers.insert(
            actor.get_id(),
            WorkerHandle {
                worker_id,
                queue,
                actor,
                handle,
            },
        );
        Ok(())
    }

    async fn spawn_monitor(&mut self, supervisor: ActorCell) -> Result<(), ActorProcessingErr> {
        let monitor = StalledJobMonitor::new(
            self.store.clone(),
            self.registry.clone(),
            self.events.clone(),
            self.config.lease_window,
        );
        let args = MonitorArgs {
            monitor,
            interval: self.config.monitor_interval,
        };
        let monitor = Actor::spawn_linked(None, MonitorActor::<S>::new(), args, supervisor)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn monitor: {}", e)))?;
        self.monitor = Some(monitor);
        Ok(())
    }

    async fn spawn_scheduler(
        &mut self,
        supervisor: ActorCell,
        scheduler: Scheduler<S>,
    ) -> Result<(), ActorProcessingErr> {
        let args = SchedulerArgs {
            scheduler,
            tick: self.config.scheduler_tick,
        };
        let scheduler = Actor::spawn_linked(None, SchedulerActor::<S>::new(), args, supervisor)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn scheduler: {}", e)))?;
        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Replace a child that stopped outside of shutdown with a fresh one in
    /// the same role.
    async fn restart_child(&mut self, supervisor: ActorCell, id: ActorId) -> Result<(), ActorProcessingErr> {
        if let Some(worker) = self.workers.remove(&id) {
            tracing::info!(worker_id = %worker.worker_id, "restarting worker");
            return self.spawn_worker(supervisor, worker.worker_id, worker.queue).await;
        }

        if self.monitor.as_ref().is_some_and(|(monitor, _)| monitor.get_id() == id) {
            self.monitor = None;
            tracing::info!("restarting stalled-job monitor");
            return self.spawn_monitor(supervisor).await;
        }

        if self.scheduler.as_ref().is_some_and(|(scheduler, _)| scheduler.get_id() == id) {
            self.scheduler = None;
            if let Some(template) = &self.scheduler_template {
                // In-memory watermarks died with the old actor.
                let mut scheduler = template.clone();
                scheduler.resume_at(Utc::now());
                tracing::info!("restarting scheduler");
                return self.spawn_scheduler(supervisor, scheduler).await;
            }
        }

        Ok(())
    }
}

/// Supervisor actor for the queue system.
///
/// Starts `concurrency` workers per registered queue, one stalled-job monitor
/// and, if configured, the scheduler. A child that stops or fails before
/// shutdown is restarted in the same role; workers keep their id.
pub struct Supervisor<S>(PhantomData<fn() -> S>);

impl<S> Supervisor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for Supervisor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for Supervisor<S> {
    type Msg = SupervisorMessage;
    type State = SupervisorState<S>;
    type Arguments = SupervisorArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job queue supervisor");
        args.config.validate(&args.registry)?;

        let mut state = SupervisorState {
            store: args.store,
            registry: args.registry,
            events: args.events,
            config: args.config,
            workers: HashMap::new(),
            monitor: None,
            scheduler: None,
            scheduler_template: args.scheduler.clone(),
            shutting_down: false,
        };

        let mut queues: Vec<QueueConfig> = state.registry.queues().cloned().collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        for queue in queues {
            for n in 1..=queue.concurrency.max(1) {
                let worker_id = format!("{}-worker-{}", queue.name, n);
                state
                    .spawn_worker(myself.get_cell(), worker_id, queue.clone())
                    .await?;
            }
        }

        state.spawn_monitor(myself.get_cell()).await?;
        if let Some(scheduler) = args.scheduler {
            state.spawn_scheduler(myself.get_cell(), scheduler).await?;
        }

        tracing::info!(workers = state.workers.len(), "job queue supervisor started");
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::WorkerCount { reply } => {
                let _ = reply.send(state.workers.len());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.shutting_down = true;

                if let Some((scheduler, handle)) = state.scheduler.take() {
                    let _ = scheduler.send_message(SchedulerMessage::Shutdown);
                    let _ = handle.await;
                }
                if let Some((monitor, handle)) = state.monitor.take() {
                    let _ = monitor.send_message(MonitorMessage::Shutdown);
                    let _ = handle.await;
                }

                // Workers finish their in-flight job before they see the message.
                let workers: Vec<WorkerHandle> = state.workers.drain().map(|(_, w)| w).collect();
                for worker in &workers {
                    let _ = worker.actor.send_message(WorkerMessage::Shutdown);
                }
                for worker in workers {
                    let _ = worker.handle.await;
                }

                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if state.shutting_down {
                    tracing::debug!(actor = %cell.get_id(), "child stopped");
                } else {
                    tracing::warn!(
                        "Child actor {} terminated: {:?}",
                        cell.get_id(),
                        reason
                    );
                    state.restart_child(myself.get_cell(), cell.get_id()).await?;
                }
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::error!("Child actor {} failed: {}", cell.get_id(), err);
                if !state.shutting_down {
                    state.restart_child(myself.get_cell(), cell.get_id()).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start the supervisor and everything it owns.
pub async fn start_supervisor<S: JobStore>(
    args: SupervisorArgs<S>,
) -> Result<(ActorRef<SupervisorMessage>, JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor::<S>::new(), args).await
}
