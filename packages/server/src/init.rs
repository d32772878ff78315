//! Queue wiring for the server: queues, processors and recurring jobs.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{
    ActorRef, EventBus, FnProcessor, Producer, ProcessorFuture, ProcessorResult, QueueRegistry,
    QueueResult, Scheduler, StatePersistence, SupervisorArgs, SupervisorMessage, SystemConfig,
    purge_jobs, start_supervisor,
};
use chrono::Utc;
use db::JobStore;
use queue_core::{Backoff, JobStatus, QueueConfig};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::notify::{Notification, NotificationSink};

pub const DOCUMENTS: &str = "documents";
pub const NOTIFICATIONS: &str = "notifications";
pub const MAINTENANCE: &str = "maintenance";

pub const QUEUES: [&str; 3] = [DOCUMENTS, NOTIFICATIONS, MAINTENANCE];

/// Recurring maintenance jobs: `(job type, cron expression)`.
const SCHEDULES: [(&str, &str); 3] = [
    ("purge-completed", "0 3 * * *"),
    ("queue-stats", "*/15 * * * *"),
    ("health-check", "*/5 * * * *"),
];

/// Register the application's queues and processors.
pub fn build_registry<S: JobStore>(
    store: Arc<S>,
    sink: Arc<dyn NotificationSink>,
) -> QueueResult<QueueRegistry> {
    let mut registry = QueueRegistry::new();

    registry.register_queue(
        QueueConfig::new(DOCUMENTS)
            .with_max_attempts(3)
            .with_backoff(Backoff::exponential(Duration::from_secs(2)))
            .with_timeout(120)
            .with_concurrency(2),
    )?;
    registry.register_queue(
        QueueConfig::new(NOTIFICATIONS)
            .with_max_attempts(5)
            .with_backoff(Backoff::exponential(Duration::from_secs(1)))
            .with_timeout(30),
    )?;
    registry.register_queue(
        QueueConfig::new(MAINTENANCE)
            .with_max_attempts(2)
            .with_backoff(Backoff::fixed(Duration::from_secs(60)))
            .with_timeout(300),
    )?;

    registry.register_processor(
        DOCUMENTS,
        FnProcessor::new("analyze-document", |payload: Value| -> ProcessorFuture {
            Box::pin(async move { analyze_document(payload) })
        }),
    )?;

    registry.register_processor(
        NOTIFICATIONS,
        FnProcessor::new("send-notification", move |payload: Value| -> ProcessorFuture {
            Box::pin(send_notification(sink.clone(), payload))
        }),
    )?;

    let purge_store = store.clone();
    registry.register_processor(
        MAINTENANCE,
        FnProcessor::new("purge-completed", move |payload: Value| -> ProcessorFuture {
            Box::pin(purge_completed(purge_store.clone(), payload))
        }),
    )?;

    let stats_store = store.clone();
    registry.register_processor(
        MAINTENANCE,
        FnProcessor::new("queue-stats", move |_payload: Value| -> ProcessorFuture {
            Box::pin(queue_stats(stats_store.clone()))
        }),
    )?;

    registry.register_processor(
        MAINTENANCE,
        FnProcessor::new("health-check", move |_payload: Value| -> ProcessorFuture {
            Box::pin(health_check(store.clone()))
        }),
    )?;

    Ok(registry)
}

fn analyze_document(payload: Value) -> ProcessorResult {
    let document_id = payload
        .get("document_id")
        .and_then(Value::as_str)
        .ok_or("payload is missing 'document_id'")?;
    let text = payload.get("text").and_then(Value::as_str).unwrap_or_default();

    tracing::info!(%document_id, "analyzing document");
    Ok(json!({
        "document_id": document_id,
        "words": text.split_whitespace().count(),
        "analyzed_at": Utc::now(),
    }))
}

async fn send_notification(sink: Arc<dyn NotificationSink>, payload: Value) -> ProcessorResult {
    let notification = Notification::from_payload(&payload)?;
    sink.deliver(&notification)?;
    Ok(json!({ "delivered_to": notification.recipient }))
}

async fn purge_completed<S: JobStore>(store: Arc<S>, payload: Value) -> ProcessorResult {
    let hours = payload
        .get("older_than_hours")
        .and_then(Value::as_i64)
        .unwrap_or(24);
    let cutoff = Utc::now() - chrono::Duration::hours(hours);

    let mut removed = 0;
    for queue in QUEUES {
        removed += purge_jobs(store.as_ref(), queue, JobStatus::Completed, cutoff)
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(json!({ "removed": removed, "cutoff": cutoff }))
}

async fn queue_stats<S: JobStore>(store: Arc<S>) -> ProcessorResult {
    let mut report = serde_json::Map::new();
    for queue in QUEUES {
        let stats = store.queue_stats(queue).await.map_err(|e| e.to_string())?;
        tracing::info!(
            %queue,
            pending = stats.pending,
            processing = stats.processing,
            completed = stats.completed,
            failed = stats.failed,
            "queue stats"
        );
        report.insert(
            queue.to_string(),
            serde_json::to_value(stats).map_err(|e| e.to_string())?,
        );
    }
    Ok(Value::Object(report))
}

async fn health_check<S: JobStore>(store: Arc<S>) -> ProcessorResult {
    store
        .queue_stats(MAINTENANCE)
        .await
        .map_err(|e| format!("store unreachable: {}", e))?;
    Ok(json!({ "store": "ok", "checked_at": Utc::now() }))
}

/// A running queue system.
pub struct QueueSystem<S> {
    pub producer: Producer<S>,
    supervisor: ActorRef<SupervisorMessage>,
    handle: JoinHandle<()>,
}

impl<S: JobStore> QueueSystem<S> {
    /// Stop every actor, letting in-flight jobs finish.
    pub async fn shutdown(self) {
        tracing::info!("Stopping job queue system...");
        if self.supervisor.send_message(SupervisorMessage::Shutdown).is_ok() {
            let _ = self.handle.await;
        }
        tracing::info!("Job queue system stopped");
    }
}

/// Initialize the job queue system on `store`.
pub async fn start<S: JobStore>(
    store: Arc<S>,
    sink: Arc<dyn NotificationSink>,
    config: SystemConfig,
) -> Result<QueueSystem<S>, Box<dyn Error>> {
    tracing::info!("Initializing job queue system...");

    let registry = Arc::new(build_registry(store.clone(), sink)?);
    config.validate(&registry)?;
    let events = EventBus::new(config.event_capacity);
    let producer = Producer::new(store.clone(), registry.clone(), events.clone())
        .with_lease_window(config.lease_window);

    let mut scheduler = Scheduler::new(producer.clone());
    if let Some(dir) = &config.state_dir {
        scheduler = scheduler.with_persistence(StatePersistence::new(dir));
    }
    for (job_type, expression) in SCHEDULES {
        scheduler.schedule(MAINTENANCE, job_type, json!({}), expression)?;
    }

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        store,
        registry,
        events,
        config,
        scheduler: Some(scheduler),
    })
    .await?;

    tracing::info!("Job queue system initialized");
    Ok(QueueSystem {
        producer,
        supervisor,
        handle,
    })
}
