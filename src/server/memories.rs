use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiResult, AppState};

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let memories = state.memory.list().await?;
    Ok(Json(json!({ "memories": memories })))
}

#[derive(Deserialize)]
pub struct UpdateMemoryRequest {
    pub content: String,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateMemoryRequest>,
) -> ApiResult<Json<Value>> {
    let entry = state.memory.update(id, &request.content).await?;
    Ok(Json(json!({ "memory": entry })))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.memory.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
