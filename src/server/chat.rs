//! POST /api/chat — run one exchange and stream it as server-sent events.
//!
//! Wire events: `thread` (once, after thread resolution), `delta`,
//! `tool_call`, `tool_result`, then exactly one of `done` or `error`.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ApiError, AppState};
use crate::agent::StreamEvent;
use crate::store::ThreadSource;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub thread_id: Option<i64>,
    pub message: String,
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Resolve the thread before the first event so `thread` can lead.
    let thread_id = match request.thread_id {
        Some(id) => state.threads.get(id).await?.id,
        None => {
            state
                .threads
                .create(None, ThreadSource::User, None)
                .await?
                .id
        }
    };

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    let agent = state.agent.clone();
    let message = request.message;

    tokio::spawn(async move {
        let send = |event: Event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Ok(event)).await;
            }
        };

        send(named("thread", json!({ "thread_id": thread_id }))).await;

        let mut handle = match agent.run_stream(thread_id, &message).await {
            Ok(handle) => handle,
            Err(e) => {
                send(named("error", json!({ "message": e.to_string() }))).await;
                return;
            }
        };
        tracing::debug!(thread_id, model = %handle.model, "Chat stream started");

        while let Some(event) = handle.events.recv().await {
            let wire = match event {
                StreamEvent::Delta(content) => named("delta", json!({ "content": content })),
                StreamEvent::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => named(
                    "tool_call",
                    json!({ "callId": call_id, "name": name, "arguments": arguments }),
                ),
                StreamEvent::ToolResult {
                    call_id,
                    name,
                    output,
                } => named(
                    "tool_result",
                    json!({ "callId": call_id, "name": name, "output": output }),
                ),
            };
            send(wire).await;
        }

        // The outcome resolves strictly after the last stream event.
        let outcome = handle.outcome.await.unwrap_or_default();
        let terminal = match outcome.error {
            Some(message) => named("error", json!({ "message": message })),
            None => {
                let mut data = json!({});
                if let Some(usage) = outcome.usage {
                    data["usage"] = json!({
                        "input_tokens": usage.input_tokens,
                        "output_tokens": usage.output_tokens,
                        "total_tokens": usage.total_tokens,
                    });
                }
                named("done", data)
            }
        };
        send(terminal).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30))))
}

fn named(name: &str, data: serde_json::Value) -> Event {
    Event::default().event(name).data(data.to_string())
}
