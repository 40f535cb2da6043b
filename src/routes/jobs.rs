use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::status::{JobStatusResponse, PollState, SubmitResponse};

/// POST /api/v1/jobs: Upload an image for text extraction.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let mut upload: Option<(Vec<u8>, image::ImageFormat)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        if field.name() == Some("image") {
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

            // Reject obvious non-images here; full decoding happens in the worker.
            let format =
                image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

            upload = Some((data.to_vec(), format));
        }
    }

    let (data, format) = upload.ok_or(StatusCode::BAD_REQUEST)?;
    let extension = format.extensions_str().first().copied().unwrap_or("img");

    tokio::fs::create_dir_all(state.upload_dir.as_ref())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create upload directory");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let path = state
        .upload_dir
        .join(format!("{}.{}", Uuid::new_v4(), extension));
    tokio::fs::write(&path, &data).await.map_err(|e| {
        tracing::error!(error = %e, path = %path.display(), "Failed to store upload");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let job_id = state
        .jobs
        .submit(&path.display().to_string())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to submit job");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            state: PollState::Pending,
            message: "Image submitted for text extraction".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: Check job status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobStatusResponse>), StatusCode> {
    let status = state.jobs.status(job_id).await.map_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "Failed to read job status");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let code = if status.state == PollState::Unknown {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };

    Ok((code, Json(status)))
}
