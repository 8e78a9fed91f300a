//! HTTP surface: the chat stream, the server-wide event channel, and the
//! REST collaborators the browser UI consumes.

mod chat;
mod events;
mod jobs;
mod memories;
mod threads;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::agent::AgentService;
use crate::bus::EventBus;
use crate::error::CoreError;
use crate::jobs::JobService;
use crate::memory::MemoryService;
use crate::threads::ThreadService;

#[derive(Clone)]
pub struct AppState {
    pub threads: Arc<ThreadService>,
    pub memory: Arc<MemoryService>,
    pub jobs: Arc<JobService>,
    pub agent: Arc<AgentService>,
    pub bus: EventBus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat::chat_stream))
        .route("/api/events", get(events::event_stream))
        .route("/api/threads", get(threads::list))
        .route(
            "/api/threads/{id}",
            get(threads::get_one).delete(threads::delete),
        )
        .route("/api/memories", get(memories::list))
        .route(
            "/api/memories/{id}",
            axum::routing::patch(memories::update).delete(memories::delete),
        )
        .route("/api/jobs", get(jobs::list).post(jobs::create))
        .route(
            "/api/jobs/{id}",
            get(jobs::get_one).patch(jobs::update).delete(jobs::delete),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// CoreError mapped onto the wire: Validation is 4xx-shaped, NotFound is
/// distinguishable, Upstream points at the collaborator, the rest are 500s.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Upstream(_) => StatusCode::BAD_GATEWAY,
            CoreError::Storage(_) | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
