mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{
    EnqueueOptions, FnProcessor, ProcessorFuture, Scheduler, SupervisorArgs, SupervisorMessage,
    SystemConfig, processor, start_supervisor,
};
use chrono::Utc;
use db::JobStore;
use queue_core::{Backoff, Job, JobEvent, JobStatus, QueueConfig};
use serde_json::json;

use common::{FlakyStore, Harness, memory_harness, wait_until};

fn fast_config() -> SystemConfig {
    SystemConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_store_backoff(Duration::from_millis(50))
        .with_monitor_interval(Duration::from_millis(100))
        .with_scheduler_tick(Duration::from_millis(100))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_supervised_workers_drain_queue() {
    let harness = memory_harness(|registry| {
        registry
            .register_queue(QueueConfig::new("documents").with_concurrency(2))
            .unwrap();
        registry
            .register_processor(
                "documents",
                processor!("count", |payload| {
                    let words = payload
                        .get("text")
                        .and_then(|text| text.as_str())
                        .map_or(0, |text| text.split_whitespace().count());
                    Ok(json!({ "words": words }))
                }),
            )
            .unwrap();
    });

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        store: harness.store.clone(),
        registry: harness.registry.clone(),
        events: harness.events.clone(),
        config: fast_config(),
        scheduler: None,
    })
    .await
    .unwrap();

    let workers = ractor::call!(supervisor, |reply| SupervisorMessage::WorkerCount { reply }).unwrap();
    assert_eq!(workers, 2);

    let mut ids = Vec::new();
    for n in 0..10 {
        let payload = json!({ "text": "word ".repeat(n) });
        let id = harness
            .producer
            .enqueue("documents", "count", payload, EnqueueOptions::default())
            .await
            .unwrap();
        ids.push(id);
    }

    let store = harness.store.clone();
    let done = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.queue_stats("documents").await.unwrap().completed == 10 }
    })
    .await;
    assert!(done, "queue was not drained");

    for (n, id) in ids.into_iter().enumerate() {
        let job = harness.job(id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({ "words": n })));
    }

    supervisor.send_message(SupervisorMessage::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor stops")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_back_off_during_store_outage() {
    let harness = Harness::with_store(FlakyStore::new(), |registry| {
        registry.register_queue(QueueConfig::new("q")).unwrap();
        registry
            .register_processor("q", processor!("echo", |payload| Ok(payload)))
            .unwrap();
    });
    harness.store.set_down(true);

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        store: harness.store.clone(),
        registry: harness.registry.clone(),
        events: harness.events.clone(),
        config: fast_config(),
        scheduler: None,
    })
    .await
    .unwrap();

    // Enqueueing fails while the store is down; nothing is stored.
    assert!(
        harness
            .producer
            .enqueue("q", "echo", json!({}), EnqueueOptions::default())
            .await
            .is_err()
    );

    let job = Job::new("q", "echo", json!("survived"));
    let id = harness.store.inner().create_job(&job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        harness.store.inner().get_job(id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );

    harness.store.set_down(false);
    let inner = harness.store.inner().clone();
    let done = wait_until(Duration::from_secs(5), || {
        let inner = inner.clone();
        async move {
            inner
                .get_job(id)
                .await
                .unwrap()
                .is_some_and(|job| job.status == JobStatus::Completed)
        }
    })
    .await;
    assert!(done, "job was not processed after the store recovered");

    supervisor.send_message(SupervisorMessage::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor stops")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_feeds_workers() {
    let harness = memory_harness(|registry| {
        registry.register_queue(QueueConfig::new("maintenance")).unwrap();
        registry
            .register_processor("maintenance", processor!("heartbeat", |_payload| Ok(json!("ok"))))
            .unwrap();
    });
    let mut events = harness.events.subscribe();

    let mut scheduler = Scheduler::new(harness.producer.clone());
    // Six fields: every second.
    scheduler
        .schedule("maintenance", "heartbeat", json!({}), "* * * * * *")
        .unwrap();

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        store: harness.store.clone(),
        registry: harness.registry.clone(),
        events: harness.events.clone(),
        config: fast_config(),
        scheduler: Some(scheduler),
    })
    .await
    .unwrap();

    let fired = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(JobEvent::ScheduleFired { job_id, .. }) = events.recv().await {
                return job_id;
            }
        }
    })
    .await
    .expect("schedule fired");

    let store = harness.store.clone();
    let done = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .get_job(fired)
                .await
                .unwrap()
                .is_some_and(|job| job.status == JobStatus::Completed)
        }
    })
    .await;
    assert!(done, "scheduled job was not processed");

    supervisor.send_message(SupervisorMessage::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor stops")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_supervisor_rejects_lease_shorter_than_timeout() {
    let harness = memory_harness(|registry| {
        registry
            .register_queue(QueueConfig::new("q").with_timeout(30))
            .unwrap();
    });

    let result = start_supervisor(SupervisorArgs {
        store: harness.store.clone(),
        registry: harness.registry.clone(),
        events: harness.events.clone(),
        config: fast_config().with_lease_window(Duration::from_secs(30)),
        scheduler: None,
    })
    .await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_killed_children_are_replaced() {
    let calls = Arc::new(AtomicUsize::new(0));
    let slow_calls = calls.clone();
    let harness = memory_harness(move |registry| {
        registry
            .register_queue(
                QueueConfig::new("q")
                    .with_timeout(1)
                    .with_backoff(Backoff::fixed(Duration::from_millis(50))),
            )
            .unwrap();
        registry
            .register_processor(
                "q",
                FnProcessor::new("slow", move |_payload: serde_json::Value| -> ProcessorFuture {
                    let first = slow_calls.fetch_add(1, Ordering::SeqCst) == 0;
                    Box::pin(async move {
                        if first {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                        Ok(json!("done"))
                    })
                }),
            )
            .unwrap();
        registry
            .register_processor("q", processor!("heartbeat", |_payload| Ok(json!("ok"))))
            .unwrap();
    });

    let mut scheduler = Scheduler::new(harness.producer.clone());
    scheduler.schedule("q", "heartbeat", json!({}), "* * * * * *").unwrap();

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        store: harness.store.clone(),
        registry: harness.registry.clone(),
        events: harness.events.clone(),
        config: fast_config().with_lease_window(Duration::from_secs(2)),
        scheduler: Some(scheduler),
    })
    .await
    .unwrap();

    let id = harness
        .producer
        .enqueue("q", "slow", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let store = harness.store.clone();
    let claimed = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .get_job(id)
                .await
                .unwrap()
                .is_some_and(|job| job.status == JobStatus::Processing)
        }
    })
    .await;
    assert!(claimed, "job was not claimed");

    // The worker dies holding the claim; the monitor and scheduler die too.
    let mut events = harness.events.subscribe();
    for child in supervisor.get_children() {
        child.kill();
    }
    let killed_at = Utc::now();

    // A replacement monitor reclaims the job and a replacement worker runs it.
    let store = harness.store.clone();
    let done = wait_until(Duration::from_secs(10), || {
        let store = store.clone();
        async move {
            store
                .get_job(id)
                .await
                .unwrap()
                .is_some_and(|job| job.status == JobStatus::Completed)
        }
    })
    .await;
    assert!(done, "stalled job was not recovered");
    assert_eq!(harness.job(id).await.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let refired = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(event @ JobEvent::ScheduleFired { .. }) = events.recv().await {
                if event.timestamp() > killed_at {
                    return;
                }
            }
        }
    })
    .await;
    assert!(refired.is_ok(), "scheduler was not restarted");

    let workers = ractor::call!(supervisor, |reply| SupervisorMessage::WorkerCount { reply }).unwrap();
    assert_eq!(workers, 1);

    supervisor.send_message(SupervisorMessage::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor stops")
        .unwrap();
}
