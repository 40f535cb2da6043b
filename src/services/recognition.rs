use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::preprocess::NormalizedImage;

/// A text recognition backend: normalized image in, raw text out.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short engine name used in errors and logs.
    fn name(&self) -> &'static str;

    async fn extract_text(&self, image: &NormalizedImage) -> Result<String, OcrError>;
}

/// Wraps an [`OcrEngine`] so every failure comes back classified and every
/// success comes back trimmed.
#[derive(Clone)]
pub struct RecognitionAdapter {
    engine: Arc<dyn OcrEngine>,
    timeout: Duration,
}

impl RecognitionAdapter {
    pub fn new(engine: Arc<dyn OcrEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub async fn recognize(&self, image: &NormalizedImage) -> Result<String, RecognitionError> {
        let engine = self.engine.name();
        match tokio::time::timeout(self.timeout, self.engine.extract_text(image)).await {
            Ok(Ok(text)) => Ok(text.trim().to_string()),
            Ok(Err(e)) => Err(RecognitionError {
                engine,
                message: e.to_string(),
            }),
            Err(_) => Err(RecognitionError {
                engine,
                message: format!("timed out after {:?}", self.timeout),
            }),
        }
    }
}

/// Classified recognition failure carried into the failed job record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{engine} engine error: {message}")]
pub struct RecognitionError {
    pub engine: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine API returned an error: {0}")]
    Api(String),

    #[error("failed to parse engine response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to encode image for engine: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to run engine process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("engine process exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
}
