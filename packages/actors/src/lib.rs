//! Actor system for the job queue.
//!
//! This crate provides the producer API, the worker loop, the stalled-job
//! monitor and the cron scheduler, all driven by Ractor actors.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that starts and restarts the others
//! - `WorkerActor` - Claims and processes jobs from one queue
//! - `MonitorActor` - Reclaims jobs whose claim outlived the lease window
//! - `SchedulerActor` - Enqueues recurring jobs from cron expressions
//!
//! # Usage
//!
//! ```ignore
//! use actors::{EventBus, Producer, QueueRegistry, SupervisorArgs, SystemConfig, processor, start_supervisor};
//!
//! let mut registry = QueueRegistry::new();
//! registry.register_queue(QueueConfig::new("emails"))?;
//! registry.register_processor("emails", processor!("send", |payload| Ok(payload)))?;
//! let registry = Arc::new(registry);
//!
//! let events = EventBus::default();
//! let producer = Producer::new(store.clone(), registry.clone(), events.clone());
//! let (supervisor, handle) = start_supervisor(SupervisorArgs { store, registry, events, config, scheduler: None }).await?;
//!
//! producer.enqueue("emails", "send", json!({"to": "a@b.c"}), EnqueueOptions::default()).await?;
//! ```

mod config;
mod error;
mod events;
mod handler;
mod messages;
mod monitor;
mod persistence;
mod producer;
mod registry;
mod retry;
mod scheduler;
mod supervisor;
mod worker;
mod worker_actor;

pub use config::SystemConfig;
pub use error::{QueueError, QueueResult};
pub use events::EventBus;
pub use handler::{FnProcessor, Processor, ProcessorFuture, ProcessorResult};
pub use messages::{MonitorMessage, SchedulerMessage, SupervisorMessage, WorkerMessage};
pub use monitor::{MonitorActor, MonitorArgs, StalledJobMonitor};
pub use persistence::{PersistenceError, StatePersistence};
pub use producer::{EnqueueOptions, Producer, purge_jobs};
pub use registry::QueueRegistry;
pub use retry::{Claim, FailureOutcome, RetryPolicy};
pub use scheduler::{ScheduledEntry, Scheduler, SchedulerActor, SchedulerArgs};
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use worker::{TickOutcome, Worker};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};

#[doc(hidden)]
pub use serde_json;
