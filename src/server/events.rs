//! GET /api/events — the server-wide channel. Forwards whatever the `sse`
//! bus topic publishes, using the payload's `type` as the wire event name.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::AppState;
use crate::bus::TOPIC_SSE;

pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|event| {
        let event = event.ok()?;
        if event.topic != TOPIC_SSE {
            return None;
        }
        let name = event.payload["type"].as_str()?.to_string();
        let data = event.payload.get("data").cloned().unwrap_or_default();
        Some(Ok(Event::default().event(name).data(data.to_string())))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}
