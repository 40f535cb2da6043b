//! Shared setup for pipeline and HTTP tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use ocr_jobs::models::status::JobStatusResponse;
use ocr_jobs::services::{
    events::EventBus,
    jobs::JobService,
    preprocess::NormalizedImage,
    queue::MemoryJobQueue,
    recognition::{OcrEngine, OcrError, RecognitionAdapter},
    store::MemoryResultStore,
    worker::{Worker, WorkerPool},
};

use crate::fixtures::ImageFixture;

/// Engine that maps normalized image sizes to known text.
pub struct FixtureEngine {
    texts: HashMap<(u32, u32), &'static str>,
    calls: AtomicUsize,
    delay: Duration,
}

impl FixtureEngine {
    pub fn new(fixtures: &[ImageFixture]) -> Self {
        Self {
            texts: fixtures.iter().map(|f| (f.normalized_size(), f.text)).collect(),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FixtureEngine {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn extract_text(&self, image: &NormalizedImage) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.texts
            .get(&(image.width(), image.height()))
            .map(|text| format!("{}\n", text))
            .ok_or_else(|| {
                OcrError::Api(format!("no text for {}x{}", image.width(), image.height()))
            })
    }
}

/// A scratch directory removed on drop.
pub struct ScratchDir(PathBuf);

impl ScratchDir {
    pub fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("ocr-jobs-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        Self(dir)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Render `fixture` as a white image in this directory.
    pub fn write_image(&self, fixture: &ImageFixture) -> PathBuf {
        let path = self.0.join(fixture.filename);
        image::RgbImage::from_pixel(fixture.width, fixture.height, image::Rgb([255, 255, 255]))
            .save(&path)
            .expect("write fixture image");
        path
    }

    pub fn write_bytes(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.0.join(name);
        std::fs::write(&path, bytes).expect("write fixture bytes");
        path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// PNG bytes for `fixture`, for uploads.
pub fn encode_png(fixture: &ImageFixture) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        fixture.width,
        fixture.height,
        image::Rgb([255, 255, 255]),
    ))
    .write_to(&mut buf, image::ImageFormat::Png)
    .expect("encode fixture png");
    buf.into_inner()
}

/// Gateway, workers and backends running in this process.
pub struct Pipeline {
    pub service: JobService,
    pub queue: Arc<MemoryJobQueue>,
    pub store: Arc<MemoryResultStore>,
    pub engine: Arc<FixtureEngine>,
    pub events: EventBus,
    pub pool: Option<WorkerPool>,
}

impl Pipeline {
    /// Backends and a service with no workers running yet.
    pub fn idle(engine: FixtureEngine) -> Self {
        let queue = Arc::new(MemoryJobQueue::new());
        let store = Arc::new(MemoryResultStore::new());
        Self {
            service: JobService::new(queue.clone(), store.clone()),
            queue,
            store,
            engine: Arc::new(engine),
            events: EventBus::new(),
            pool: None,
        }
    }

    pub fn start(engine: FixtureEngine, workers: usize) -> Self {
        let mut pipeline = Self::idle(engine);
        pipeline.spawn_workers(workers);
        pipeline
    }

    pub fn worker(&self, id: &str) -> Worker {
        Worker::new(
            id,
            self.queue.clone(),
            self.store.clone(),
            RecognitionAdapter::new(self.engine.clone(), Duration::from_secs(5)),
            self.events.clone(),
        )
        .with_retry_delay(Duration::from_millis(10))
    }

    pub fn spawn_workers(&mut self, workers: usize) {
        self.pool = Some(WorkerPool::spawn(self.worker("test-worker"), workers));
    }

    pub async fn shutdown(mut self) {
        if let Some(pool) = self.pool.take() {
            tokio::time::timeout(Duration::from_secs(10), pool.shutdown())
                .await
                .expect("workers did not stop");
        }
    }
}

/// Poll until `job_id` is terminal, failing the test after `timeout`.
pub async fn wait_for_terminal(
    service: &JobService,
    job_id: Uuid,
    timeout: Duration,
) -> JobStatusResponse {
    tokio::time::timeout(
        timeout,
        service.wait_for_terminal(job_id, Duration::from_millis(10)),
    )
    .await
    .unwrap_or_else(|_| panic!("job {} did not finish within {:?}", job_id, timeout))
    .expect("status lookup failed")
}
