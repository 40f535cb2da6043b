use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::job::{JobState, Stage};

const EVENT_BUFFER: usize = 256;

/// What happened to a job at a worker.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// The job entered a new state.
    Transition,
    /// A redelivered job was already terminal and was acknowledged as is.
    Duplicate,
    /// The job could not be recorded and went back to the queue.
    Requeued,
}

/// Structured record of one step of a job's life, emitted by workers.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub worker: String,
    pub kind: JobEventKind,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Fan-out of job events to tracing and to any subscribed observers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: JobEvent) {
        let stage = event.stage.map(|s| s.to_string()).unwrap_or_default();
        let detail = event.detail.as_deref().unwrap_or("");
        match (event.kind, event.state) {
            (JobEventKind::Transition, JobState::Failed) | (JobEventKind::Requeued, _) => {
                tracing::warn!(
                    job_id = %event.job_id,
                    worker = %event.worker,
                    kind = ?event.kind,
                    state = %event.state,
                    stage = %stage,
                    detail = %detail,
                    "Job event"
                );
            }
            _ => {
                tracing::info!(
                    job_id = %event.job_id,
                    worker = %event.worker,
                    kind = ?event.kind,
                    state = %event.state,
                    stage = %stage,
                    detail = %detail,
                    "Job event"
                );
            }
        }

        // No subscribers is fine; tracing already has the event.
        let _ = self.tx.send(event);
    }
}
