//! Wiring shared by the server and worker binaries.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Backend, ConfigError, OcrEngineKind};
use crate::db;
use crate::services::{
    events::EventBus,
    ocr::WorkersAiClient,
    queue::{JobQueue, MemoryJobQueue, QueueError, RedisJobQueue},
    recognition::{OcrEngine, RecognitionAdapter},
    store::{MemoryResultStore, PgResultStore, ResultStore},
    tesseract::TesseractCli,
    worker::Worker,
};

/// Initialize structured JSON logging, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// The queue and result store a process works against.
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn ResultStore>,
}

/// Open the configured queue and store. `consumer` names this process's
/// in-flight list on the Redis queue.
pub async fn connect_backends(
    config: &AppConfig,
    consumer: &str,
) -> Result<Backends, SetupError> {
    match config.backend {
        Backend::Memory => {
            tracing::warn!("Using in-memory queue and store; jobs do not survive a restart");
            Ok(Backends {
                queue: Arc::new(MemoryJobQueue::new()),
                store: Arc::new(MemoryResultStore::new()),
            })
        }
        Backend::RedisPostgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let redis_url = config
                .redis_url
                .as_deref()
                .ok_or(ConfigError::Missing("REDIS_URL"))?;

            tracing::info!("Connecting to PostgreSQL result store");
            let settings = db::PoolSettings {
                max_connections: config.database_max_connections,
                ..Default::default()
            };
            let pool = db::init_pool(database_url, &settings).await?;

            tracing::info!("Running database migrations");
            db::run_migrations(&pool).await?;

            tracing::info!(consumer = consumer, "Connecting to Redis job queue");
            let queue = RedisJobQueue::open(redis_url, consumer, config.dequeue_timeout())?;

            Ok(Backends {
                queue: Arc::new(queue),
                store: Arc::new(PgResultStore::new(pool)),
            })
        }
    }
}

/// Build the recognition adapter for the configured engine.
pub fn build_recognizer(config: &AppConfig) -> Result<RecognitionAdapter, SetupError> {
    let engine: Arc<dyn OcrEngine> = match config.ocr_engine {
        OcrEngineKind::Tesseract => {
            tracing::info!(
                bin = %config.tesseract_bin,
                lang = %config.tesseract_lang,
                "Using tesseract engine"
            );
            Arc::new(TesseractCli::new(&config.tesseract_bin, &config.tesseract_lang))
        }
        OcrEngineKind::WorkersAi => {
            let account_id = config
                .cf_account_id
                .as_deref()
                .ok_or(ConfigError::Missing("CF_ACCOUNT_ID"))?;
            let api_token = config
                .cf_api_token
                .as_deref()
                .ok_or(ConfigError::Missing("CF_API_TOKEN"))?;

            tracing::info!("Using Cloudflare Workers AI engine");
            let client = WorkersAiClient::new(account_id, api_token);
            Arc::new(match config.cf_model.as_deref() {
                Some(model) => client.with_model(model),
                None => client,
            })
        }
    };

    Ok(RecognitionAdapter::new(engine, config.recognition_timeout()))
}

/// Worker template for a pool; copies are named `<worker_id>-<n>`.
pub fn build_worker(
    config: &AppConfig,
    backends: &Backends,
    events: EventBus,
) -> Result<Worker, SetupError> {
    Ok(Worker::new(
        &config.worker_id,
        backends.queue.clone(),
        backends.store.clone(),
        build_recognizer(config)?,
        events,
    )
    .with_max_attempts(config.job_max_attempts))
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue setup failed: {0}")]
    Queue(#[from] QueueError),
}
