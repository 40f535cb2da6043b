use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Lifecycle state of an OCR job, as stored and reported to pollers.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    /// Position in the `Pending -> Running -> terminal` order.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Succeeded | JobState::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Pipeline stage a job failed in.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Preprocess,
    Recognize,
    /// The outcome could not be stored within the attempt cap.
    Record,
}

/// Structured description of why a job failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobFailure {
    pub stage: Stage,
    pub message: String,
}

impl JobFailure {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Current status of a job together with its outcome, if any.
///
/// Recognized text and failures live in separate variants, so an OCR result
/// that happens to read "Error" is still a success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded { text: String },
    Failed { failure: JobFailure },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Running => JobState::Running,
            JobStatus::Succeeded { .. } => JobState::Succeeded,
            JobStatus::Failed { .. } => JobState::Failed,
        }
    }
}

/// One unit of OCR work and its current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub id: Uuid,
    pub input_reference: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// How an incoming write relates to the record already stored under its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supersession {
    /// The write moves the record forward (or repeats a non-terminal stage).
    Replace,
    /// The write is older than what is stored and must be ignored.
    Stale,
    /// The write belongs to a different job that reused the id.
    Conflict,
}

impl JobRecord {
    /// A freshly submitted job.
    pub fn pending(id: Uuid, input_reference: impl Into<String>) -> Self {
        Self {
            id,
            input_reference: input_reference.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    pub fn result(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Succeeded { text } => Some(text),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&JobFailure> {
        match &self.status {
            JobStatus::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Copy of this record picked up by a worker.
    pub fn started(&self) -> Self {
        Self {
            status: JobStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            ..self.clone()
        }
    }

    /// Copy of this record with a terminal outcome.
    pub fn finished(&self, outcome: Result<String, JobFailure>) -> Self {
        let status = match outcome {
            Ok(text) => JobStatus::Succeeded { text },
            Err(failure) => JobStatus::Failed { failure },
        };
        Self {
            status,
            started_at: self.started_at.or_else(|| Some(Utc::now())),
            completed_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Decide whether `self` may overwrite `existing` in the result store.
    ///
    /// Terminal records never change. Otherwise a write wins when its state is
    /// at least as far along as the stored one, so a redelivered job may
    /// repeat `Running` but never move a record backwards.
    pub fn supersedes(&self, existing: &JobRecord) -> Supersession {
        if self.input_reference != existing.input_reference {
            return Supersession::Conflict;
        }
        if existing.state().is_terminal() {
            return Supersession::Stale;
        }
        if self.state().rank() >= existing.state().rank() {
            Supersession::Replace
        } else {
            Supersession::Stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::pending(Uuid::new_v4(), "uploads/receipt.png")
    }

    #[test]
    fn test_pending_record_has_no_outcome() {
        let job = record();
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.result().is_none());
        assert!(job.error().is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_forward_transitions_replace() {
        let pending = record();
        let running = pending.started();
        let done = running.finished(Ok("TOTAL 12.00".to_string()));

        assert_eq!(running.supersedes(&pending), Supersession::Replace);
        assert_eq!(done.supersedes(&running), Supersession::Replace);
        assert_eq!(done.supersedes(&pending), Supersession::Replace);
        assert_eq!(done.result(), Some("TOTAL 12.00"));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_repeated_running_replaces() {
        let running = record().started();
        let redelivered = running.started();
        assert_eq!(redelivered.supersedes(&running), Supersession::Replace);
    }

    #[test]
    fn test_backward_transition_is_stale() {
        let pending = record();
        let running = pending.started();
        assert_eq!(pending.supersedes(&running), Supersession::Stale);
    }

    #[test]
    fn test_terminal_record_is_never_replaced() {
        let running = record().started();
        let failed = running.finished(Err(JobFailure::new(Stage::Recognize, "engine crashed")));
        let succeeded = running.finished(Ok("late".to_string()));

        assert_eq!(running.supersedes(&failed), Supersession::Stale);
        assert_eq!(succeeded.supersedes(&failed), Supersession::Stale);
        assert_eq!(failed.supersedes(&failed), Supersession::Stale);
    }

    #[test]
    fn test_different_input_conflicts() {
        let job = record();
        let mut other = JobRecord::pending(job.id, "uploads/other.png");
        other.created_at = job.created_at;
        assert_eq!(other.supersedes(&job), Supersession::Conflict);
    }

    #[test]
    fn test_error_text_from_engine_is_still_success() {
        let done = record().started().finished(Ok("Error".to_string()));
        assert_eq!(done.state(), JobState::Succeeded);
        assert!(done.error().is_none());
    }

    #[test]
    fn test_state_string_forms() {
        assert_eq!(JobState::Succeeded.to_string(), "succeeded");
        assert_eq!("running".parse::<JobState>().unwrap(), JobState::Running);
        assert_eq!(Stage::Preprocess.to_string(), "preprocess");
        let failure = JobFailure::new(Stage::Preprocess, "unreadable image");
        assert_eq!(failure.to_string(), "preprocess failed: unreadable image");
        assert_eq!("record".parse::<Stage>().unwrap(), Stage::Record);
    }
}
