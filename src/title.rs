//! Thread-title handler. After a thread's first exchange completes, ask the
//! LM for a short title and announce it on the server-wide channel. Entirely
//! best-effort: anything unexpected means no update, and no error escapes.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{EventBus, TOPIC_RESPONSE_COMPLETE, TOPIC_SSE};
use crate::llm::ChatProvider;
use crate::store::MessageRole;
use crate::threads::ThreadService;

const ASSISTANT_SNIPPET_CHARS: usize = 300;

pub struct TitleHandler {
    threads: Arc<ThreadService>,
    provider: Arc<dyn ChatProvider>,
    bus: EventBus,
    model: String,
}

impl TitleHandler {
    pub fn new(
        threads: Arc<ThreadService>,
        provider: Arc<dyn ChatProvider>,
        bus: EventBus,
        model: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            threads,
            provider,
            bus,
            model,
        })
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    // Falling behind loses events; titling is best-effort.
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                if event.topic != TOPIC_RESPONSE_COMPLETE {
                    continue;
                }
                let Some(thread_id) = event.payload["thread_id"].as_i64() else {
                    continue;
                };
                self.handle(thread_id).await;
            }
        })
    }

    pub(crate) async fn handle(&self, thread_id: i64) {
        let thread = match self.threads.find(thread_id).await {
            Ok(Some(thread)) => thread,
            Ok(None) => return,
            Err(e) => {
                warn!(thread_id, error = %e, "Title handler could not load thread");
                return;
            }
        };
        if thread.title.is_some() {
            return;
        }

        let messages = match self.threads.messages(thread_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(thread_id, error = %e, "Title handler could not load messages");
                return;
            }
        };

        let non_system: Vec<_> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        // Only the first exchange gets a generated title.
        if non_system.len() != 2 {
            return;
        }

        let user_text = non_system
            .iter()
            .find(|m| m.role == MessageRole::User)
            .and_then(|m| m.content["content"].as_str())
            .unwrap_or_default();
        let assistant_text = non_system
            .iter()
            .find(|m| m.role == MessageRole::Assistant)
            .and_then(|m| m.content["content"].as_str())
            .unwrap_or_default();
        if user_text.is_empty() || assistant_text.is_empty() {
            return;
        }

        let prompt = format!(
            "Write a 3-6 word title for this conversation. Reply with the title only, no quotes.\n\nUser: {}\n\nAssistant: {}",
            user_text,
            snippet(assistant_text, ASSISTANT_SNIPPET_CHARS)
        );

        let title = match self
            .provider
            .complete(&self.model, &[json!({ "role": "user", "content": prompt })])
            .await
        {
            Ok(raw) => raw.trim().trim_matches('"').trim().to_string(),
            Err(e) => {
                warn!(thread_id, error = %e, "Title generation failed");
                return;
            }
        };
        if title.is_empty() {
            return;
        }

        if let Err(e) = self.threads.update_title(thread_id, &title).await {
            warn!(thread_id, error = %e, "Failed to store generated title");
            return;
        }
        debug!(thread_id, title = %title, "Thread titled");
        self.bus.publish(
            TOPIC_SSE,
            json!({
                "type": "thread:updated",
                "data": { "id": thread_id, "title": title },
            }),
        );
    }
}

fn snippet(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::store::ThreadSource;
    use crate::testing::{test_store, MockProvider, MockTurn};

    async fn setup(turns: Vec<MockTurn>) -> (Arc<TitleHandler>, Arc<ThreadService>, EventBus) {
        let threads = Arc::new(ThreadService::new(Arc::new(test_store().await)));
        let bus = EventBus::new();
        let provider = Arc::new(MockProvider::new(turns));
        let handler = TitleHandler::new(
            threads.clone(),
            provider,
            bus.clone(),
            "mock-model".to_string(),
        );
        (handler, threads, bus)
    }

    async fn seed_exchange(threads: &ThreadService) -> i64 {
        let thread = threads
            .create(None, ThreadSource::User, None)
            .await
            .unwrap();
        threads
            .add_message(
                thread.id,
                MessageRole::System,
                None,
                &json!({"role": "system", "content": "base"}),
            )
            .await
            .unwrap();
        threads
            .add_message(
                thread.id,
                MessageRole::User,
                None,
                &json!({"role": "user", "content": "plan my trip to Kyoto"}),
            )
            .await
            .unwrap();
        threads
            .add_message(
                thread.id,
                MessageRole::Assistant,
                Some("m"),
                &json!({"role": "assistant", "content": "Here is an itinerary..."}),
            )
            .await
            .unwrap();
        thread.id
    }

    #[tokio::test]
    async fn titles_first_exchange_and_publishes_update() {
        let (handler, threads, bus) = setup(vec![MockTurn::text("Kyoto Trip Planning")]).await;
        let mut sse = bus.subscribe();
        let thread_id = seed_exchange(&threads).await;

        handler.handle(thread_id).await;

        let thread = threads.get(thread_id).await.unwrap();
        assert_eq!(thread.title.as_deref(), Some("Kyoto Trip Planning"));

        let event = sse.recv().await.unwrap();
        assert_eq!(event.topic, TOPIC_SSE);
        assert_eq!(event.payload["type"], "thread:updated");
        assert_eq!(event.payload["data"]["id"], thread_id);
        assert_eq!(event.payload["data"]["title"], "Kyoto Trip Planning");
    }

    #[tokio::test]
    async fn strips_wrapping_quotes() {
        let (handler, threads, _bus) = setup(vec![MockTurn::text("\"Kyoto Trip\"  ")]).await;
        let thread_id = seed_exchange(&threads).await;
        handler.handle(thread_id).await;
        assert_eq!(
            threads.get(thread_id).await.unwrap().title.as_deref(),
            Some("Kyoto Trip")
        );
    }

    #[tokio::test]
    async fn later_exchanges_are_a_no_op() {
        let (handler, threads, _bus) = setup(vec![MockTurn::text("should not be used")]).await;
        let thread_id = seed_exchange(&threads).await;
        threads
            .add_message(
                thread_id,
                MessageRole::User,
                None,
                &json!({"role": "user", "content": "another question"}),
            )
            .await
            .unwrap();

        handler.handle(thread_id).await;
        assert!(threads.get(thread_id).await.unwrap().title.is_none());
    }

    #[tokio::test]
    async fn lm_failure_and_empty_title_are_swallowed() {
        let (handler, threads, _bus) = setup(vec![MockTurn::error("down")]).await;
        let thread_id = seed_exchange(&threads).await;
        handler.handle(thread_id).await;
        assert!(threads.get(thread_id).await.unwrap().title.is_none());

        let (handler, threads, _bus) = setup(vec![MockTurn::text("   ")]).await;
        let thread_id = seed_exchange(&threads).await;
        handler.handle(thread_id).await;
        assert!(threads.get(thread_id).await.unwrap().title.is_none());
    }

    #[tokio::test]
    async fn missing_thread_is_a_no_op() {
        let (handler, _threads, _bus) = setup(vec![]).await;
        handler.handle(424242).await;
    }

    #[tokio::test]
    async fn existing_title_is_never_overwritten() {
        let (handler, threads, _bus) = setup(vec![MockTurn::text("New Title")]).await;
        let thread_id = seed_exchange(&threads).await;
        threads.update_title(thread_id, "User's Title").await.unwrap();

        handler.handle(thread_id).await;
        assert_eq!(
            threads.get(thread_id).await.unwrap().title.as_deref(),
            Some("User's Title")
        );
    }
}
