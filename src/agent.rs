//! Conversation engine: drives the LM over a thread's persisted messages
//! with the tool set, streaming deltas and tool events to a single consumer.
//!
//! Persistence rules the rest of the system depends on:
//! - the user message is written before any remote call
//! - the system prompt is written once, on the first exchange, and frozen
//! - an assistant message is persisted on success and on mid-stream error
//!   (partial text, no usage), but never when the consumer cancels
//! - tool calls and results are ephemeral within a run, never persisted

use chrono::Local;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, TOPIC_RESPONSE_COMPLETE};
use crate::error::{CoreError, CoreResult};
use crate::llm::{ChatProvider, TokenUsage};
use crate::memory::{MemoryService, RecallHit, DEFAULT_RECALL_LIMIT};
use crate::store::{Message, MessageRole};
use crate::threads::ThreadService;
use crate::tools::ToolRegistry;

/// Fixed prose embedded into every system prompt.
pub const BASE_INSTRUCTIONS: &str = "\
You are a personal assistant with a persistent memory that survives across conversations.

Memory discipline:
- Always call `recall` before `remember`, so you can update an existing memory instead of creating a near-duplicate.
- Each `remember` call stores ONE atomic fact, phrased so it stands alone.
- To update an existing memory, pass its id as `replace_id`; without it, the old and new memories will coexist.
- Be selective: remember only things that will stay useful, not task-scoped details.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        name: String,
        output: String,
    },
}

/// Terminal state of a run, resolved after the last stream event.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub usage: Option<TokenUsage>,
    /// Set when the run died mid-stream; the adapter surfaces it as an
    /// `error` wire event.
    pub error: Option<String>,
}

pub struct StreamHandle {
    pub model: String,
    pub events: mpsc::Receiver<StreamEvent>,
    pub outcome: oneshot::Receiver<RunOutcome>,
}

pub struct AgentService {
    threads: Arc<ThreadService>,
    memory: Arc<MemoryService>,
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    bus: EventBus,
    model: String,
    max_iterations: usize,
}

impl AgentService {
    pub fn new(
        threads: Arc<ThreadService>,
        memory: Arc<MemoryService>,
        provider: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        bus: EventBus,
        model: String,
        max_iterations: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            threads,
            memory,
            provider,
            tools,
            bus,
            model,
            max_iterations,
        })
    }

    /// Run one exchange on a thread. The returned handle's event stream is a
    /// single-consumer lazy sequence in LM order; dropping it cancels the
    /// run, and a cancelled run never persists partial text.
    pub async fn run_stream(
        self: &Arc<Self>,
        thread_id: i64,
        user_message: &str,
    ) -> CoreResult<StreamHandle> {
        let user_message = user_message.trim();
        if user_message.is_empty() {
            return Err(CoreError::validation("message must not be empty"));
        }
        self.threads.get(thread_id).await?;

        // Step 1: the user's input survives any crash from here on.
        self.threads
            .add_message(
                thread_id,
                MessageRole::User,
                None,
                &json!({ "role": "user", "content": user_message }),
            )
            .await?;

        // Steps 2-3: first exchange gets the one frozen system message.
        let messages = self.threads.messages(thread_id).await?;
        let non_system = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .count();
        if non_system == 1 {
            let system_text = self.assemble_system_prompt(user_message).await;
            self.threads
                .add_message(
                    thread_id,
                    MessageRole::System,
                    None,
                    &json!({ "role": "system", "content": system_text }),
                )
                .await?;
        }

        // Step 4: final list, system first, the rest in id order.
        let messages = self.threads.messages(thread_id).await?;
        let lm_messages = to_lm_messages(&messages);

        let (events_tx, events_rx) = mpsc::channel(64);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let agent = self.clone();
        tokio::spawn(async move {
            agent.drive(thread_id, lm_messages, events_tx, outcome_tx).await;
        });

        Ok(StreamHandle {
            model: self.model.clone(),
            events: events_rx,
            outcome: outcome_rx,
        })
    }

    /// Best-effort: a recall outage degrades the prompt, never the run.
    async fn assemble_system_prompt(&self, user_message: &str) -> String {
        let recalled = match self.memory.recall(user_message, DEFAULT_RECALL_LIMIT).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Memory recall failed during prompt assembly, continuing without");
                Vec::new()
            }
        };
        build_system_text(&recalled)
    }

    /// Steps 5-10: the tool-call loop. Runs detached from the caller; all
    /// results flow through the stream, the outcome channel, and the store.
    async fn drive(
        &self,
        thread_id: i64,
        mut lm_messages: Vec<Value>,
        events_tx: mpsc::Sender<StreamEvent>,
        outcome_tx: oneshot::Sender<RunOutcome>,
    ) {
        let tool_defs = self.tools.definitions();
        let mut full_text = String::new();
        let mut usage: Option<TokenUsage> = None;
        let mut run_error: Option<String> = None;
        let mut cancelled = false;

        'run: for iteration in 0..self.max_iterations {
            let (delta_tx, delta_rx) = mpsc::channel::<String>(32);
            let forwarder = spawn_delta_forwarder(delta_rx, events_tx.clone());

            let result = self
                .provider
                .chat_stream(&self.model, &lm_messages, &tool_defs, delta_tx)
                .await;

            let (iteration_text, forward_cancelled) =
                forwarder.await.unwrap_or((String::new(), true));
            full_text.push_str(&iteration_text);
            if forward_cancelled {
                cancelled = true;
                break 'run;
            }

            let turn = match result {
                Ok(turn) => turn,
                Err(e) => {
                    error!(thread_id, iteration, error = %e, "LM stream failed");
                    run_error = Some(e.to_string());
                    break 'run;
                }
            };

            if let Some(turn_usage) = turn.usage {
                match usage.as_mut() {
                    Some(total) => total.add(&turn_usage),
                    None => usage = Some(turn_usage),
                }
            }

            if turn.tool_calls.is_empty() {
                break 'run;
            }

            lm_messages.push(json!({
                "role": "assistant",
                "content": turn.content,
                "tool_calls": turn.tool_calls.iter().map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments }
                })).collect::<Vec<_>>(),
            }));

            for call in turn.tool_calls {
                let sent = events_tx
                    .send(StreamEvent::ToolCall {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;
                if sent.is_err() {
                    cancelled = true;
                    break 'run;
                }

                let output = self
                    .tools
                    .execute(&call.id, &call.name, &call.arguments)
                    .await;

                let sent = events_tx
                    .send(StreamEvent::ToolResult {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        output: output.clone(),
                    })
                    .await;
                if sent.is_err() {
                    cancelled = true;
                    break 'run;
                }

                lm_messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output,
                }));
            }
        }

        // Close the stream before resolving the outcome, so `done`/`error`
        // strictly follows the last event.
        drop(events_tx);

        if cancelled {
            debug!(thread_id, "Run cancelled by consumer, partial text discarded");
            return;
        }

        if run_error.is_some() && full_text.is_empty() {
            // Died before any delta: nothing to persist.
            let _ = outcome_tx.send(RunOutcome {
                usage: None,
                error: run_error,
            });
            return;
        }

        // Step 8: persist what the user saw — the full reply, or the partial
        // text of an errored stream (without usage).
        let mut content = json!({ "role": "assistant", "content": full_text });
        let persisted_usage = if run_error.is_none() { usage } else { None };
        if let Some(u) = &persisted_usage {
            content["usage"] = json!({
                "input_tokens": u.input_tokens,
                "output_tokens": u.output_tokens,
                "total_tokens": u.total_tokens,
            });
        }
        if let Err(e) = self
            .threads
            .add_message(thread_id, MessageRole::Assistant, Some(&self.model), &content)
            .await
        {
            error!(thread_id, error = %e, "Failed to persist assistant message");
            let _ = outcome_tx.send(RunOutcome {
                usage: None,
                error: Some(e.to_string()),
            });
            return;
        }

        if run_error.is_none() {
            info!(thread_id, chars = full_text.len(), "Exchange completed");
            self.bus
                .publish(TOPIC_RESPONSE_COMPLETE, json!({ "thread_id": thread_id }));
        }

        let _ = outcome_tx.send(RunOutcome {
            usage: persisted_usage,
            error: run_error,
        });
    }
}

/// Forward provider deltas to the consumer while accumulating them. Returns
/// the accumulated text and whether the consumer went away mid-stream.
fn spawn_delta_forwarder(
    mut delta_rx: mpsc::Receiver<String>,
    events_tx: mpsc::Sender<StreamEvent>,
) -> tokio::task::JoinHandle<(String, bool)> {
    tokio::spawn(async move {
        let mut text = String::new();
        let mut consumer_gone = false;
        while let Some(delta) = delta_rx.recv().await {
            text.push_str(&delta);
            if !consumer_gone && events_tx.send(StreamEvent::Delta(delta)).await.is_err() {
                consumer_gone = true;
                // Dropping the receiver tells the provider to stop reading.
                break;
            }
        }
        (text, consumer_gone)
    })
}

fn build_system_text(recalled: &[RecallHit]) -> String {
    let mut text = BASE_INSTRUCTIONS.to_string();
    text.push_str(&format!(
        "\n\nThe current date and time is {}.",
        Local::now().format("%A, %B %-d, %Y at %-I:%M %p (%Z)")
    ));
    if !recalled.is_empty() {
        text.push_str("\n\nRelevant context from memory:\n");
        for hit in recalled {
            text.push_str(&format!("- {}\n", hit.entry.content));
        }
    }
    text
}

/// Map persisted messages into LM input. The system message leads; tool
/// messages are never replayed.
fn to_lm_messages(messages: &[Message]) -> Vec<Value> {
    let mut lm = Vec::with_capacity(messages.len());
    for message in messages.iter().filter(|m| m.role == MessageRole::System) {
        lm.push(json!({
            "role": "system",
            "content": message.content["content"].as_str().unwrap_or_default(),
        }));
    }
    for message in messages {
        match message.role {
            MessageRole::System | MessageRole::Tool => continue,
            MessageRole::User | MessageRole::Assistant => lm.push(json!({
                "role": message.role.as_str(),
                "content": message.content["content"].as_str().unwrap_or_default(),
            })),
        }
    }
    lm
}
