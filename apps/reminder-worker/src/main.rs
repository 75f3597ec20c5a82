use std::sync::Arc;
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reminder_cell::{ReminderDeliveryWorker, WorkerConfig};
use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    if !config.is_configured() {
        warn!("Store credentials missing; reminder polling will fail until configured");
    }

    let worker = Arc::new(ReminderDeliveryWorker::new(WorkerConfig::from_app_config(&config), &config));
    info!(
        "Starting reminder worker {} (poll every {}s)",
        worker.worker_id(),
        config.reminder_poll_interval_seconds
    );

    let runner = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.start().await })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutdown requested; finishing current cycle");
    worker.shutdown().await;

    match runner.await {
        Ok(Ok(())) => info!("Reminder worker stopped"),
        Ok(Err(e)) => error!("Reminder worker exited with error: {}", e),
        Err(e) => error!("Reminder worker task panicked: {}", e),
    }
}
