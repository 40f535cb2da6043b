use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

/// Where the queue and the result store live.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Redis queue and PostgreSQL result store, shared between processes.
    RedisPostgres,
    /// Everything inside one server process (requires embedded workers).
    Memory,
}

/// Which OCR engine the workers call.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngineKind {
    Tesseract,
    WorkersAi,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    #[serde(default = "default_backend")]
    #[garde(skip)]
    pub backend: Backend,

    /// PostgreSQL connection string
    #[garde(skip)]
    pub database_url: Option<String>,

    #[serde(default = "default_database_max_connections")]
    #[garde(range(min = 1, max = 200))]
    pub database_max_connections: u32,

    /// Redis connection string for job queue
    #[garde(skip)]
    pub redis_url: Option<String>,

    /// Directory uploaded images are written to
    #[serde(default = "default_upload_dir")]
    #[garde(length(min = 1))]
    pub upload_dir: String,

    /// Consumer name; owns the Redis processing list for in-flight jobs
    #[serde(default = "default_worker_id")]
    #[garde(length(min = 1, max = 64))]
    pub worker_id: String,

    /// Workers run by the worker binary
    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub worker_concurrency: usize,

    /// Workers run inside the server process
    #[serde(default)]
    #[garde(range(max = 64))]
    pub embedded_workers: usize,

    #[serde(default = "default_ocr_engine")]
    #[garde(skip)]
    pub ocr_engine: OcrEngineKind,

    #[serde(default = "default_tesseract_bin")]
    #[garde(length(min = 1))]
    pub tesseract_bin: String,

    #[serde(default = "default_tesseract_lang")]
    #[garde(length(min = 1))]
    pub tesseract_lang: String,

    /// Cloudflare account ID
    #[garde(skip)]
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    #[garde(skip)]
    pub cf_api_token: Option<String>,

    /// Workers AI model override
    #[garde(skip)]
    pub cf_model: Option<String>,

    #[serde(default = "default_recognition_timeout_secs")]
    #[garde(range(min = 1, max = 3600))]
    pub recognition_timeout_secs: u64,

    /// How long one blocking dequeue waits before re-checking for shutdown
    #[serde(default = "default_dequeue_timeout_secs")]
    #[garde(range(min = 1, max = 60))]
    pub dequeue_timeout_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1024))]
    pub max_upload_bytes: usize,

    /// Deliveries of one job before it is failed instead of requeued
    #[serde(default = "default_job_max_attempts")]
    #[garde(range(min = 1, max = 20))]
    pub job_max_attempts: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_backend() -> Backend {
    Backend::RedisPostgres
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_upload_dir() -> String {
    "images".to_string()
}

fn default_worker_id() -> String {
    "worker".to_string()
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_ocr_engine() -> OcrEngineKind {
    OcrEngineKind::Tesseract
}

fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

fn default_tesseract_lang() -> String {
    "eng".to_string()
}

fn default_recognition_timeout_secs() -> u64 {
    120
}

fn default_dequeue_timeout_secs() -> u64 {
    1
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_job_max_attempts() -> u32 {
    3
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.check()?;
        Ok(config)
    }

    /// Field ranges plus cross-field requirements.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        match self.backend {
            Backend::RedisPostgres => {
                if self.redis_url.is_none() {
                    return Err(ConfigError::Missing("REDIS_URL"));
                }
                if self.database_url.is_none() {
                    return Err(ConfigError::Missing("DATABASE_URL"));
                }
            }
            Backend::Memory => {
                if self.embedded_workers == 0 {
                    return Err(ConfigError::Invalid(
                        "memory backend needs EMBEDDED_WORKERS >= 1".to_string(),
                    ));
                }
            }
        }

        if self.ocr_engine == OcrEngineKind::WorkersAi {
            if self.cf_account_id.is_none() {
                return Err(ConfigError::Missing("CF_ACCOUNT_ID"));
            }
            if self.cf_api_token.is_none() {
                return Err(ConfigError::Missing("CF_API_TOKEN"));
            }
        }

        Ok(())
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.recognition_timeout_secs)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
