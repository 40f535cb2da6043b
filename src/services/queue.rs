use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::models::job::JobRecord;

const QUEUE_KEY: &str = "ocr_jobs:queue";
const PROCESSING_KEY_PREFIX: &str = "ocr_jobs:processing";

/// Job payload carried by the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub input_reference: String,
    pub submitted_at: DateTime<Utc>,
    /// Earlier deliveries that ended without a stored outcome.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedJob {
    /// The payload for the next delivery after a failed attempt.
    pub fn retried(&self, error: impl Into<String>) -> Self {
        Self {
            attempts: self.attempts + 1,
            last_error: Some(error.into()),
            ..self.clone()
        }
    }
}

impl From<&JobRecord> for QueuedJob {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            input_reference: record.input_reference.clone(),
            submitted_at: record.created_at,
            attempts: 0,
            last_error: None,
        }
    }
}

/// A job handed to a worker. The receipt identifies this delivery when it is
/// acknowledged or requeued.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: QueuedJob,
    receipt: String,
}

impl Delivery {
    pub fn job_id(&self) -> Uuid {
        self.job.job_id
    }
}

/// At-least-once job channel between the gateway and the workers.
///
/// A delivered job stays in flight until [`JobQueue::complete`] is called; if
/// the consumer dies first, [`JobQueue::recover`] puts it back.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Wait for the next job. Returns [`QueueError::Closed`] once the queue
    /// has been closed.
    async fn dequeue(&self) -> Result<Delivery, QueueError>;

    /// Acknowledge a delivery.
    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Acknowledge a delivery and queue `next` in its place.
    async fn requeue(&self, delivery: &Delivery, next: &QueuedJob) -> Result<(), QueueError>;

    /// Move every unacknowledged delivery of this consumer back to the queue.
    async fn recover(&self) -> Result<u64, QueueError>;

    /// Number of jobs waiting to be delivered.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;

    /// Stop handing out jobs and reject new ones.
    fn close(&self);
}

/// Redis-backed queue. Each consumer owns a processing list that holds its
/// in-flight jobs.
pub struct RedisJobQueue {
    client: redis::Client,
    processing_key: String,
    poll_timeout: Duration,
    closed: AtomicBool,
}

impl RedisJobQueue {
    /// Open a queue handle for `consumer`.
    pub fn open(
        redis_url: &str,
        consumer: &str,
        poll_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            processing_key: format!("{}:{}", PROCESSING_KEY_PREFIX, consumer),
            poll_timeout,
            closed: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        let mut conn = self.connection().await?;
        loop {
            self.ensure_open()?;

            let payload: Option<String> = redis::cmd("BRPOPLPUSH")
                .arg(QUEUE_KEY)
                .arg(&self.processing_key)
                .arg(self.poll_timeout.as_secs_f64())
                .query_async(&mut conn)
                .await?;

            let Some(payload) = payload else {
                continue;
            };

            match serde_json::from_str::<QueuedJob>(&payload) {
                Ok(job) => {
                    return Ok(Delivery {
                        job,
                        receipt: payload,
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        payload = %payload,
                        "Dropping undecodable queue payload"
                    );
                    conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload).await?;
                }
            }
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &delivery.receipt)
            .await?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, next: &QueuedJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(next)?;
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lpush(QUEUE_KEY, &payload)
            .ignore()
            .lrem(&self.processing_key, 1, &delivery.receipt)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            let payload: Option<String> = conn.rpoplpush(&self.processing_key, QUEUE_KEY).await?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MemoryState {
    pending: VecDeque<String>,
    in_flight: Vec<String>,
}

/// In-process queue with the same delivery semantics as [`RedisJobQueue`].
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivered but unacknowledged jobs.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

fn remove_receipt(in_flight: &mut Vec<String>, receipt: &str) {
    if let Some(pos) = in_flight.iter().position(|p| p == receipt) {
        in_flight.remove(pos);
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.ensure_open()?;
        let payload = serde_json::to_string(job)?;
        self.state.lock().await.pending.push_back(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            // Registered before the checks so a concurrent enqueue or close
            // cannot slip between them and the wait.
            let notified = self.notify.notified();
            self.ensure_open()?;
            {
                let mut state = self.state.lock().await;
                while let Some(payload) = state.pending.pop_front() {
                    match serde_json::from_str::<QueuedJob>(&payload) {
                        Ok(job) => {
                            state.in_flight.push(payload.clone());
                            return Ok(Delivery {
                                job,
                                receipt: payload,
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping undecodable queue payload");
                        }
                    }
                }
            }
            notified.await;
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        remove_receipt(&mut state.in_flight, &delivery.receipt);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, next: &QueuedJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(next)?;
        {
            let mut state = self.state.lock().await;
            remove_receipt(&mut state.in_flight, &delivery.receipt);
            state.pending.push_back(payload);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn recover(&self) -> Result<u64, QueueError> {
        let moved = {
            let mut state = self.state.lock().await;
            let in_flight = std::mem::take(&mut state.in_flight);
            let moved = in_flight.len() as u64;
            state.pending.extend(in_flight);
            moved
        };
        for _ in 0..moved {
            self.notify.notify_one();
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.ensure_open()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(name: &str) -> QueuedJob {
        QueuedJob::from(&JobRecord::pending(Uuid::new_v4(), &format!("uploads/{}", name)))
    }

    #[tokio::test]
    async fn test_enqueue_then_dequeue() {
        let queue = MemoryJobQueue::new();
        let submitted = job("a.png");
        queue.enqueue(&submitted).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 1);

        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(delivery.job, submitted);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(queue.in_flight().await, 1);

        queue.complete(&delivery).await.unwrap();
        assert_eq!(queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(MemoryJobQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::task::yield_now().await;

        let submitted = job("late.png");
        queue.enqueue(&submitted).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap();
        assert_eq!(delivery.job_id(), submitted.job_id);
    }

    #[tokio::test]
    async fn test_unacknowledged_job_is_recovered() {
        let queue = MemoryJobQueue::new();
        let submitted = job("crash.png");
        queue.enqueue(&submitted).await.unwrap();

        let _lost = queue.dequeue().await.unwrap();
        assert_eq!(queue.recover().await.unwrap(), 1);

        let redelivered = queue.dequeue().await.unwrap();
        assert_eq!(redelivered.job, submitted);
    }

    #[tokio::test]
    async fn test_requeue_returns_job_with_its_attempt_count() {
        let queue = MemoryJobQueue::new();
        let submitted = job("retry.png");
        queue.enqueue(&submitted).await.unwrap();

        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(delivery.job.attempts, 0);
        queue
            .requeue(&delivery, &delivery.job.retried("store down"))
            .await
            .unwrap();
        assert_eq!(queue.in_flight().await, 0);
        assert_eq!(queue.depth().await.unwrap(), 1);

        let again = queue.dequeue().await.unwrap();
        assert_eq!(again.job_id(), submitted.job_id);
        assert_eq!(again.job.attempts, 1);
        assert_eq!(again.job.last_error.as_deref(), Some("store down"));
    }

    #[test]
    fn test_payload_without_attempts_decodes_as_first_delivery() {
        let payload = serde_json::json!({
            "job_id": Uuid::new_v4().to_string(),
            "input_reference": "uploads/old.png",
            "submitted_at": "2026-01-01T00:00:00Z",
        });
        let job: QueuedJob = serde_json::from_value(payload).unwrap();
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert!(!serde_json::to_string(&job).unwrap().contains("last_error"));
    }

    #[tokio::test]
    async fn test_duplicates_are_delivered_separately() {
        let queue = MemoryJobQueue::new();
        let submitted = job("twice.png");
        queue.enqueue(&submitted).await.unwrap();
        queue.enqueue(&submitted).await.unwrap();

        let first = queue.dequeue().await.unwrap();
        let second = queue.dequeue().await.unwrap();
        assert_eq!(first.job, second.job);

        queue.complete(&first).await.unwrap();
        assert_eq!(queue.in_flight().await, 1);
        queue.complete(&second).await.unwrap();
        assert_eq!(queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumers() {
        let queue = Arc::new(MemoryJobQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::task::yield_now().await;

        queue.close();
        let result = consumer.await.unwrap();
        assert!(matches!(result, Err(QueueError::Closed)));
        assert!(matches!(queue.enqueue(&job("x.png")).await, Err(QueueError::Closed)));
    }

    #[test]
    fn test_dequeue_parks_until_a_job_arrives() {
        let queue = MemoryJobQueue::new();
        let mut dequeue = tokio_test::task::spawn(queue.dequeue());
        tokio_test::assert_pending!(dequeue.poll());

        let submitted = job("wake.png");
        tokio_test::block_on(queue.enqueue(&submitted)).unwrap();
        assert!(dequeue.is_woken());

        let delivery = tokio_test::assert_ready_ok!(dequeue.poll());
        assert_eq!(delivery.job, submitted);
    }
}
