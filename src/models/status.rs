use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::job::{JobRecord, JobState, Stage};

/// State reported to a polling client. `Unknown` covers ids that were never
/// submitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PollState {
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Succeeded | PollState::Failed)
    }
}

impl From<JobState> for PollState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Pending => PollState::Pending,
            JobState::Running => PollState::Running,
            JobState::Succeeded => PollState::Succeeded,
            JobState::Failed => PollState::Failed,
        }
    }
}

/// Response after submitting an image.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub state: PollState,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub state: PollState,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed_stage: Option<Stage>,
}

impl JobStatusResponse {
    pub fn unknown(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: PollState::Unknown,
            result: None,
            error: None,
            failed_stage: None,
        }
    }
}

impl From<&JobRecord> for JobStatusResponse {
    fn from(record: &JobRecord) -> Self {
        let failure = record.error();
        Self {
            job_id: record.id,
            state: record.state().into(),
            result: record.result().map(str::to_string),
            error: failure.map(ToString::to_string),
            failed_stage: failure.map(|f| f.stage),
        }
    }
}
