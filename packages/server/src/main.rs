//! Job queue server: connects the store, starts workers, monitor and
//! scheduler, and runs until interrupted.

use std::error::Error;
use std::sync::Arc;

use actors::SystemConfig;
use db::DbConfig;
use tracing_subscriber::EnvFilter;

mod init;
mod notify;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let db_config = DbConfig::from_env();
    let config = SystemConfig::from_env()?;
    tracing::info!(
        endpoint = %db_config.endpoint,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        lease_window_secs = config.lease_window.as_secs(),
        "starting queue server"
    );

    let store = Arc::new(db::open(&db_config).await?);
    let system = init::start(store, Arc::new(notify::LogSink), config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    for queue in init::QUEUES {
        match system.producer.queue_stats(queue).await {
            Ok(stats) => tracing::info!(
                %queue,
                pending = stats.pending,
                failed = stats.failed,
                "queue state at shutdown"
            ),
            Err(e) => tracing::warn!(%queue, error = %e, "could not read queue stats"),
        }
    }
    system.shutdown().await;

    Ok(())
}
