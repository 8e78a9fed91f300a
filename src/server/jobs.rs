use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::{ApiResult, AppState};
use crate::jobs::{JobDraft, JobPatch};

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let jobs = state.jobs.list().await?;
    Ok(Json(json!({ "jobs": jobs })))
}

pub async fn create(
    State(state): State<AppState>,
    Json(draft): Json<JobDraft>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let job = state.jobs.create(draft).await?;
    Ok((StatusCode::CREATED, Json(json!({ "job": job }))))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let (job, runs) = state.jobs.get(id).await?;
    Ok(Json(json!({ "job": job, "runs": runs })))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<JobPatch>,
) -> ApiResult<Json<Value>> {
    let job = state.jobs.update(id, patch).await?;
    Ok(Json(json!({ "job": job })))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.jobs.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
