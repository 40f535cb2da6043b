use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::models::job::{JobFailure, JobRecord, JobState, JobStatus, Stage};
use crate::services::events::{EventBus, JobEvent, JobEventKind};
use crate::services::preprocess;
use crate::services::queue::{Delivery, JobQueue, QueueError};
use crate::services::recognition::RecognitionAdapter;
use crate::services::store::{PutOutcome, ResultStore, StoreError};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What a worker did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// The job reached a terminal state.
    Finished(JobState),
    /// The job was already terminal; the delivery was acknowledged.
    Duplicate,
    /// The id belongs to another input; the delivery was dropped.
    Rejected,
}

/// One execution unit: takes a job from the queue, runs preprocessing and
/// recognition, and records the outcome.
#[derive(Clone)]
pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
    recognizer: RecognitionAdapter,
    events: EventBus,
    retry_delay: Duration,
    max_attempts: u32,
}

impl Worker {
    pub fn new(
        id: &str,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ResultStore>,
        recognizer: RecognitionAdapter,
        events: EventBus,
    ) -> Self {
        Self {
            id: id.to_string(),
            queue,
            store,
            recognizer,
            events,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Deliveries that may end without a stored outcome before the job is
    /// failed with [`Stage::Record`].
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process jobs until the queue is closed.
    pub async fn run(self) {
        tracing::info!(
            worker = %self.id,
            engine = self.recognizer.engine_name(),
            "Worker started"
        );

        loop {
            let delivery = match self.queue.dequeue().await {
                Ok(d) => d,
                Err(QueueError::Closed) => break,
                Err(e) => {
                    tracing::error!(worker = %self.id, error = %e, "Dequeue failed, will retry");
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                }
            };

            if let Err(e) = self.process(&delivery).await {
                self.retry(&delivery, &e).await;
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::info!(worker = %self.id, "Worker stopped");
    }

    /// Put a delivery back with one more attempt counted against it.
    async fn retry(&self, delivery: &Delivery, error: &WorkerError) {
        let next = delivery.job.retried(error.to_string());
        tracing::error!(
            worker = %self.id,
            job_id = %delivery.job_id(),
            attempt = next.attempts,
            max_attempts = self.max_attempts,
            error = %error,
            "Job could not be recorded, returning it to the queue"
        );

        let state = match self.store.get(delivery.job_id()).await {
            Ok(Some(record)) => record.state(),
            _ => JobState::Pending,
        };
        self.emit(delivery, JobEventKind::Requeued, state, None, Some(error.to_string()));

        if let Err(e) = self.queue.requeue(delivery, &next).await {
            tracing::error!(
                worker = %self.id,
                job_id = %delivery.job_id(),
                error = %e,
                "Requeue failed"
            );
        }
    }

    /// Drive one delivery through `Running` to a terminal state.
    ///
    /// Job-level failures (bad image, engine error) end in a `Failed` record
    /// and `Ok`. An `Err` means the outcome could not be stored and the
    /// delivery has not been acknowledged. A delivery that has already used up
    /// its attempts skips the work and records a [`Stage::Record`] failure.
    pub async fn process(&self, delivery: &Delivery) -> Result<Processed, WorkerError> {
        let job = &delivery.job;
        let started = Instant::now();

        let pending = JobRecord {
            id: job.job_id,
            input_reference: job.input_reference.clone(),
            status: JobStatus::Pending,
            created_at: job.submitted_at,
            started_at: None,
            completed_at: None,
        };
        let running = pending.started();

        match self.store.put(&running).await {
            Ok(PutOutcome::Applied) => {}
            Ok(PutOutcome::Stale) => {
                // Read before acknowledging so a failed read leaves the delivery in flight.
                let state = self
                    .store
                    .get(job.job_id)
                    .await?
                    .map(|r| r.state())
                    .unwrap_or(JobState::Running);
                self.queue.complete(delivery).await?;
                metrics::counter!("ocr_jobs_duplicate_total").increment(1);
                self.emit(delivery, JobEventKind::Duplicate, state, None, None);
                return Ok(Processed::Duplicate);
            }
            Err(StoreError::Conflict(id)) => {
                tracing::error!(
                    worker = %self.id,
                    job_id = %id,
                    "Job id already used by another input, dropping delivery"
                );
                self.queue.complete(delivery).await?;
                return Ok(Processed::Rejected);
            }
            Err(e) => return Err(e.into()),
        }
        self.emit(delivery, JobEventKind::Transition, JobState::Running, None, None);

        let outcome = if job.attempts >= self.max_attempts {
            tracing::warn!(
                worker = %self.id,
                job_id = %job.job_id,
                attempts = job.attempts,
                "Attempt cap reached, failing job"
            );
            metrics::counter!("ocr_jobs_attempts_exhausted_total").increment(1);
            Err(JobFailure::new(
                Stage::Record,
                format!(
                    "outcome not stored after {} attempts: {}",
                    job.attempts,
                    job.last_error.as_deref().unwrap_or("unknown error")
                ),
            ))
        } else {
            self.execute(PathBuf::from(&job.input_reference)).await
        };
        let finished = running.finished(outcome);
        let state = finished.state();

        // A stale result here means another delivery already finished the job.
        self.store.put(&finished).await?;
        self.queue.complete(delivery).await?;

        let elapsed = started.elapsed();
        metrics::histogram!("ocr_job_processing_seconds").record(elapsed.as_secs_f64());
        match finished.error() {
            None => metrics::counter!("ocr_jobs_succeeded_total").increment(1),
            Some(failure) => {
                let stage: &'static str = failure.stage.into();
                metrics::counter!("ocr_jobs_failed_total", "stage" => stage).increment(1)
            }
        }

        let failure = finished.error();
        self.emit(
            delivery,
            JobEventKind::Transition,
            state,
            failure.map(|f| f.stage),
            failure
                .map(|f| f.message.clone())
                .or_else(|| Some(format!("{} ms", elapsed.as_millis()))),
        );

        Ok(Processed::Finished(state))
    }

    /// Preprocess and recognize one image. Every failure is mapped to the
    /// stage it happened in.
    async fn execute(&self, path: PathBuf) -> Result<String, JobFailure> {
        let image = tokio::task::spawn_blocking(move || preprocess::preprocess_file(&path))
            .await
            .map_err(|e| {
                JobFailure::new(Stage::Preprocess, format!("preprocessing task aborted: {}", e))
            })?
            .map_err(|e| JobFailure::new(Stage::Preprocess, e.to_string()))?;

        tracing::debug!(
            worker = %self.id,
            width = image.width(),
            height = image.height(),
            "Image preprocessed"
        );

        self.recognizer
            .recognize(&image)
            .await
            .map_err(|e| JobFailure::new(Stage::Recognize, e.to_string()))
    }

    fn emit(
        &self,
        delivery: &Delivery,
        kind: JobEventKind,
        state: JobState,
        stage: Option<Stage>,
        detail: Option<String>,
    ) {
        self.events.emit(JobEvent {
            job_id: delivery.job_id(),
            worker: self.id.clone(),
            kind,
            state,
            stage,
            detail,
            at: Utc::now(),
        });
    }
}

/// A set of workers sharing one queue and one result store.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` copies of `worker`, named `<id>-0`, `<id>-1`, ...
    pub fn spawn(worker: Worker, concurrency: usize) -> Self {
        let queue = worker.queue.clone();
        let handles = (0..concurrency.max(1))
            .map(|n| {
                let mut w = worker.clone();
                w.id = format!("{}-{}", worker.id, n);
                tokio::spawn(w.run())
            })
            .collect();

        Self { queue, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue and wait for every worker to finish its current job.
    pub async fn shutdown(self) {
        self.queue.close();
        self.join().await;
    }

    /// Wait for the workers to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("result store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
