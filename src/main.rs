use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

use ocr_jobs::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{events::EventBus, worker::WorkerPool},
    setup,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup::init_tracing();

    let config = AppConfig::from_env()?;

    tracing::info!("Initializing ocr-jobs server");

    let prometheus_handle = Arc::new(PrometheusBuilder::new().install_recorder()?);
    describe_metrics();

    let backends = setup::connect_backends(&config, &config.worker_id).await?;

    // Workers sharing this process; required for the memory backend.
    let pool = if config.embedded_workers > 0 {
        let recovered = backends.queue.recover().await?;
        if recovered > 0 {
            tracing::warn!(recovered = recovered, "Returned unfinished jobs to the queue");
        }

        let worker = setup::build_worker(&config, &backends, EventBus::new())?;
        let pool = WorkerPool::spawn(worker, config.embedded_workers);
        tracing::info!(workers = pool.size(), "Embedded workers started");
        Some(pool)
    } else {
        None
    };

    let state = AppState::new(
        backends.queue.clone(),
        backends.store.clone(),
        &config.upload_dir,
    );
    let app = routes::router(state, prometheus_handle, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pool) = pool {
        tracing::info!("Stopping embedded workers");
        pool.shutdown().await;
    }

    tracing::info!("Server stopped");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("ocr_jobs_submitted_total", "Total OCR jobs submitted");
    metrics::describe_counter!("ocr_jobs_succeeded_total", "Total OCR jobs that produced text");
    metrics::describe_counter!(
        "ocr_jobs_failed_total",
        "Total OCR jobs that failed, by stage"
    );
    metrics::describe_counter!(
        "ocr_jobs_duplicate_total",
        "Deliveries acknowledged because the job was already finished"
    );
    metrics::describe_histogram!(
        "ocr_job_processing_seconds",
        "Time from dequeue to terminal record"
    );
    metrics::describe_gauge!("ocr_queue_depth", "Jobs waiting in the queue");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
