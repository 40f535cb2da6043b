use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::job::JobRecord;
use crate::models::status::{JobStatusResponse, PollState};
use crate::services::queue::{JobQueue, QueueError, QueuedJob};
use crate::services::store::{ResultStore, StoreError};

/// Submission and status entry points used by the HTTP gateway.
#[derive(Clone)]
pub struct JobService {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
}

impl JobService {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ResultStore>) -> Self {
        Self { queue, store }
    }

    /// Create a pending job for `input_reference` and enqueue it.
    ///
    /// The record is stored before the job is enqueued, so a poller holding
    /// the returned id never sees `unknown`.
    pub async fn submit(&self, input_reference: &str) -> Result<Uuid, SubmitError> {
        let record = JobRecord::pending(Uuid::new_v4(), input_reference);
        self.store.put(&record).await?;

        self.queue.enqueue(&QueuedJob::from(&record)).await?;

        metrics::counter!("ocr_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %record.id,
            input_reference = %record.input_reference,
            "Job submitted"
        );

        Ok(record.id)
    }

    /// Current status of a job; `unknown` for ids never submitted.
    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusResponse, StoreError> {
        Ok(match self.store.get(job_id).await? {
            Some(record) => JobStatusResponse::from(&record),
            None => JobStatusResponse::unknown(job_id),
        })
    }

    /// Poll [`JobService::status`] every `interval` until the job is terminal
    /// or unknown. There is no attempt limit; wrap in a timeout as needed.
    pub async fn wait_for_terminal(
        &self,
        job_id: Uuid,
        interval: Duration,
    ) -> Result<JobStatusResponse, StoreError> {
        let started = Instant::now();
        loop {
            let status = self.status(job_id).await?;
            if status.state.is_terminal() || status.state == PollState::Unknown {
                tracing::debug!(
                    job_id = %job_id,
                    state = %status.state,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Finished polling job"
                );
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to record job: {0}")]
    Store(#[from] StoreError),

    #[error("failed to enqueue job: {0}")]
    Queue(#[from] QueueError),
}
