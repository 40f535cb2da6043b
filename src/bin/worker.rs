use metrics_exporter_prometheus::PrometheusBuilder;

use ocr_jobs::{
    config::{AppConfig, Backend, ConfigError},
    services::{events::EventBus, worker::WorkerPool},
    setup,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup::init_tracing();

    tracing::info!("Starting OCR worker");

    let config = AppConfig::from_env()?;
    if config.backend == Backend::Memory {
        return Err(ConfigError::Invalid(
            "the worker binary needs BACKEND=redis_postgres; \
             use EMBEDDED_WORKERS with the memory backend"
                .to_string(),
        )
        .into());
    }

    // Counters are recorded but not served by this process.
    PrometheusBuilder::new().install_recorder()?;

    let backends = setup::connect_backends(&config, &config.worker_id).await?;

    // Jobs left in this consumer's processing list by a previous run.
    let recovered = backends.queue.recover().await?;
    if recovered > 0 {
        tracing::warn!(
            recovered = recovered,
            worker = %config.worker_id,
            "Returned unfinished jobs to the queue"
        );
    }

    let worker = setup::build_worker(&config, &backends, EventBus::new())?;
    let pool = WorkerPool::spawn(worker, config.worker_concurrency);

    tracing::info!(workers = pool.size(), "Worker ready, processing jobs");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, finishing in-flight jobs");

    pool.shutdown().await;

    tracing::info!("Worker stopped");
    Ok(())
}
