use sqlx::postgres::PgRow;
use std::borrow::Cow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobFailure, JobRecord, JobState, JobStatus, Stage};

/// PostgreSQL `TEXT` cannot hold NUL bytes, which OCR output occasionally
/// contains.
fn strip_nul(text: &str) -> Cow<'_, str> {
    if text.contains('\0') {
        Cow::Owned(text.replace('\0', ""))
    } else {
        Cow::Borrowed(text)
    }
}

/// Insert a job or move an existing one forward.
///
/// The `WHERE` clause mirrors [`JobRecord::supersedes`]: terminal rows and
/// rows belonging to a different input are never touched, and a write may not
/// lower the state rank. Returns the number of rows written (0 or 1).
pub async fn upsert_job(pool: &PgPool, job: &JobRecord) -> Result<u64, sqlx::Error> {
    let state: &'static str = job.state().into();
    let failure = job.error();
    let failed_stage: Option<&'static str> = failure.map(|f| f.stage.into());

    let result = sqlx::query(
        r#"
        INSERT INTO ocr_jobs (id, input_reference, state, result, error, failed_stage,
                              created_at, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE
        SET state = EXCLUDED.state,
            result = EXCLUDED.result,
            error = EXCLUDED.error,
            failed_stage = EXCLUDED.failed_stage,
            started_at = COALESCE(EXCLUDED.started_at, ocr_jobs.started_at),
            completed_at = EXCLUDED.completed_at
        WHERE ocr_jobs.input_reference = EXCLUDED.input_reference
          AND ocr_jobs.state IN ('pending', 'running')
          AND (CASE EXCLUDED.state WHEN 'pending' THEN 0 WHEN 'running' THEN 1 ELSE 2 END)
              >= (CASE ocr_jobs.state WHEN 'pending' THEN 0 WHEN 'running' THEN 1 ELSE 2 END)
        "#,
    )
    .bind(job.id)
    .bind(&job.input_reference)
    .bind(state)
    .bind(job.result().map(strip_nul))
    .bind(failure.map(|f| strip_nul(&f.message)))
    .bind(failed_stage)
    .bind(job.created_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, input_reference, state, result, error, failed_stage,
               created_at, started_at, completed_at
        FROM ocr_jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| job_from_row(&r)).transpose()
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, sqlx::Error> {
    let state_str: String = row.try_get("state")?;
    let state: JobState = state_str.parse().map_err(|e| {
        sqlx::Error::Decode(format!("invalid job state '{}': {}", state_str, e).into())
    })?;

    let status = match state {
        JobState::Pending => JobStatus::Pending,
        JobState::Running => JobStatus::Running,
        JobState::Succeeded => JobStatus::Succeeded {
            text: row.try_get::<Option<String>, _>("result")?.unwrap_or_default(),
        },
        JobState::Failed => {
            let stage_str: Option<String> = row.try_get("failed_stage")?;
            let stage = stage_str
                .as_deref()
                .unwrap_or("preprocess")
                .parse::<Stage>()
                .map_err(|e| sqlx::Error::Decode(format!("invalid failed stage: {}", e).into()))?;
            JobStatus::Failed {
                failure: JobFailure::new(
                    stage,
                    row.try_get::<Option<String>, _>("error")?.unwrap_or_default(),
                ),
            }
        }
    };

    Ok(JobRecord {
        id: row.try_get("id")?,
        input_reference: row.try_get("input_reference")?,
        status,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
