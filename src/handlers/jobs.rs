//! Job submission API
//!
//! Internal endpoints the dashboard and scheduler use to feed the queue.
//! The worker never calls these; it talks to the queue service directly.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Job, JobType};
use crate::services::job_queue::QueueStats;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub priority: Option<i32>,
    pub max_retries: Option<i32>,
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<serde_json::Value>> {
    // only worker-understood job types are accepted
    let job_type: JobType = request
        .job_type
        .parse()
        .map_err(|e: String| AppError::BadRequest { message: e })?;

    let params = if request.params.is_null() {
        json!({})
    } else {
        request.params
    };

    let job_id = state
        .queue
        .create_job(
            job_type.as_str(),
            params,
            request.priority.unwrap_or(5),
            request.max_retries.unwrap_or(3),
        )
        .await?;

    Ok(Json(json!({ "job_id": job_id })))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let cancelled = state.queue.cancel_job(job_id).await?;
    if !cancelled {
        return Err(AppError::Conflict {
            message: format!("job {job_id} is not pending"),
        });
    }
    Ok(Json(json!({ "job_id": job_id, "cancelled": true })))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Job>> {
    let job = state
        .queue
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: format!("job {job_id}"),
        })?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    Ok(Json(state.queue.list_recent(limit).await?))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>> {
    Ok(Json(state.queue.queue_stats().await?))
}
