use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::{ApiResult, AppState};

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let threads = state.threads.list().await?;
    Ok(Json(json!({ "threads": threads })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let thread = state.threads.get(id).await?;
    let messages = state.threads.messages(id).await?;
    Ok(Json(json!({ "thread": thread, "messages": messages })))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.threads.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
