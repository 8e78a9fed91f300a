//! Test infrastructure: scripted mock provider, deterministic embedder,
//! capturing notifier, mock directions, and fully wired agent/scheduler
//! fixtures over a temp-file SQLite database.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::agent::{AgentService, RunOutcome, StreamEvent, StreamHandle};
use crate::bus::EventBus;
use crate::directions::{DirectionsProvider, Route, TimeAnchor};
use crate::embeddings::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::jobs::JobService;
use crate::llm::{ChatProvider, ChatTurn, TokenUsage, ToolCallRequest};
use crate::memory::MemoryService;
use crate::notify::Notifier;
use crate::scheduler::JobScheduler;
use crate::skills::{Skill, SkillContext, SkillOutcome, SkillRegistry};
use crate::store::Store;
use crate::threads::ThreadService;
use crate::tools::{CurrentDatetimeTool, RecallTool, RememberTool, ToolRegistry};

/// Fresh store over a uniquely named temp file. The pool needs a real file,
/// not :memory: (each pooled connection would get its own database).
pub async fn test_store() -> Store {
    let path = std::env::temp_dir().join(format!("minder-test-{}.db", uuid::Uuid::new_v4()));
    Store::connect(path.to_str().unwrap()).await.unwrap()
}

// ---------------------------------------------------------------------------
// MockEmbedder — deterministic vectors, identical text ⇒ identical vector
// ---------------------------------------------------------------------------

pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        // Hash-seeded LCG, then normalize. Stable across runs.
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;
        let mut vec = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            vec.push(((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0);
        }
        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
        Ok(vec.into_iter().map(|v| v / norm).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// CapturingNotifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub title: String,
    pub body: String,
    pub tag: Option<String>,
    pub click_url: Option<String>,
}

#[derive(Default)]
pub struct CapturingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn notify(&self, title: &str, body: &str, tag: Option<&str>, click_url: Option<&str>) {
        self.sent.lock().await.push(SentNotification {
            title: title.to_string(),
            body: body.to_string(),
            tag: tag.map(String::from),
            click_url: click_url.map(String::from),
        });
    }
}

// ---------------------------------------------------------------------------
// MockDirections
// ---------------------------------------------------------------------------

pub struct MockDirections {
    duration_secs: i64,
    traffic_secs: Option<i64>,
    fail: bool,
}

impl MockDirections {
    pub fn new(duration_secs: i64, traffic_secs: Option<i64>) -> Self {
        Self {
            duration_secs,
            traffic_secs,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            duration_secs: 0,
            traffic_secs: None,
            fail: true,
        }
    }
}

#[async_trait]
impl DirectionsProvider for MockDirections {
    async fn route(
        &self,
        _origin: &str,
        _destination: &str,
        _anchor: TimeAnchor,
    ) -> CoreResult<Route> {
        if self.fail {
            return Err(CoreError::upstream("directions API unavailable"));
        }
        Ok(Route {
            summary: "Test Route".to_string(),
            distance_meters: 12_000,
            duration: chrono::Duration::seconds(self.duration_secs),
            duration_in_traffic: self.traffic_secs.map(chrono::Duration::seconds),
        })
    }
}

// ---------------------------------------------------------------------------
// MockProvider — scripted FIFO of turns, with a call log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockTurn {
    Text {
        content: String,
        usage: Option<TokenUsage>,
    },
    ToolCall {
        name: String,
        arguments: String,
    },
    Error {
        message: String,
        /// Text streamed out before the failure (mid-stream death).
        partial: Option<String>,
    },
}

impl MockTurn {
    pub fn text(content: &str) -> Self {
        MockTurn::Text {
            content: content.to_string(),
            usage: None,
        }
    }

    pub fn text_with_usage(content: &str, input: u64, output: u64) -> Self {
        MockTurn::Text {
            content: content.to_string(),
            usage: Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            }),
        }
    }

    pub fn tool_call(name: &str, arguments: &str) -> Self {
        MockTurn::ToolCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    pub fn error(message: &str) -> Self {
        MockTurn::Error {
            message: message.to_string(),
            partial: None,
        }
    }

    pub fn error_after_text(partial: &str, message: &str) -> Self {
        MockTurn::Error {
            message: message.to_string(),
            partial: Some(partial.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockChatCall {
    pub model: String,
    pub messages: Vec<Value>,
    pub tools: Vec<Value>,
}

pub struct MockProvider {
    turns: Mutex<Vec<MockTurn>>,
    pub call_log: Mutex<Vec<MockChatCall>>,
}

impl MockProvider {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Mutex::new(turns),
            call_log: Mutex::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }

    async fn next_turn(&self) -> MockTurn {
        let mut turns = self.turns.lock().await;
        if turns.is_empty() {
            MockTurn::text("Mock response")
        } else {
            turns.remove(0)
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Value],
        tools: &[Value],
        delta_tx: mpsc::Sender<String>,
    ) -> CoreResult<ChatTurn> {
        self.call_log.lock().await.push(MockChatCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        });

        match self.next_turn().await {
            MockTurn::Text { content, usage } => {
                // Stream in small chunks to exercise delta accumulation. A
                // closed receiver ends streaming early, like the real client.
                let mut chunk = String::new();
                for ch in content.chars() {
                    chunk.push(ch);
                    if chunk.chars().count() == 3 {
                        if delta_tx.send(std::mem::take(&mut chunk)).await.is_err() {
                            break;
                        }
                    }
                }
                if !chunk.is_empty() {
                    let _ = delta_tx.send(chunk).await;
                }
                Ok(ChatTurn {
                    content,
                    tool_calls: vec![],
                    usage,
                })
            }
            MockTurn::ToolCall { name, arguments } => Ok(ChatTurn {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: format!("call_{}", uuid::Uuid::new_v4()),
                    name,
                    arguments,
                }],
                usage: None,
            }),
            MockTurn::Error { message, partial } => {
                if let Some(partial) = partial {
                    let _ = delta_tx.send(partial).await;
                }
                Err(CoreError::upstream(message))
            }
        }
    }

    async fn complete(&self, model: &str, messages: &[Value]) -> CoreResult<String> {
        self.call_log.lock().await.push(MockChatCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: vec![],
        });
        match self.next_turn().await {
            MockTurn::Text { content, .. } => Ok(content),
            MockTurn::ToolCall { .. } => Ok(String::new()),
            MockTurn::Error { message, .. } => Err(CoreError::upstream(message)),
        }
    }
}

// ---------------------------------------------------------------------------
// Stub skills
// ---------------------------------------------------------------------------

/// Succeeds once and asks for its job to be disabled.
pub struct OneShotStubSkill;

#[async_trait]
impl Skill for OneShotStubSkill {
    fn name(&self) -> &str {
        "one-shot"
    }
    fn description(&self) -> &str {
        "Stub skill that completes and disables its job"
    }
    fn config_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _ctx: SkillContext) -> anyhow::Result<SkillOutcome> {
        Ok(SkillOutcome::done("done"))
    }
}

// ---------------------------------------------------------------------------
// Wired fixtures
// ---------------------------------------------------------------------------

pub struct TestAgent {
    pub agent: Arc<AgentService>,
    pub threads: Arc<ThreadService>,
    pub memory: Arc<MemoryService>,
    pub provider: Arc<MockProvider>,
    pub bus: EventBus,
}

/// A fully wired agent with mock LM, mock embedder, and the memory +
/// datetime tools registered. `max_iterations` is 5.
pub async fn test_agent(turns: Vec<MockTurn>) -> TestAgent {
    let store = Arc::new(test_store().await);
    let threads = Arc::new(ThreadService::new(store.clone()));
    let memory = Arc::new(
        MemoryService::new(store.clone(), Arc::new(MockEmbedder::new(8)))
            .await
            .unwrap(),
    );
    let provider = Arc::new(MockProvider::new(turns));
    let bus = EventBus::new();

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(RecallTool::new(memory.clone())));
    tools.register(Arc::new(RememberTool::new(memory.clone())));
    tools.register(Arc::new(CurrentDatetimeTool));

    let agent = AgentService::new(
        threads.clone(),
        memory.clone(),
        provider.clone(),
        Arc::new(tools),
        bus.clone(),
        "mock-model".to_string(),
        5,
    );

    TestAgent {
        agent,
        threads,
        memory,
        provider,
        bus,
    }
}

pub struct TestScheduler {
    pub scheduler: Arc<JobScheduler>,
    pub store: Arc<Store>,
    pub threads: Arc<ThreadService>,
    pub jobs: Arc<JobService>,
    pub notifier: Arc<CapturingNotifier>,
    pub provider: Arc<MockProvider>,
}

/// Scheduler wired to a mock agent, the `one-shot` stub skill, a capturing
/// notifier, and app URL `http://app.test`.
pub async fn test_scheduler(turns: Vec<MockTurn>) -> TestScheduler {
    let store = Arc::new(test_store().await);
    let threads = Arc::new(ThreadService::new(store.clone()));
    let memory = Arc::new(
        MemoryService::new(store.clone(), Arc::new(MockEmbedder::new(8)))
            .await
            .unwrap(),
    );
    let provider = Arc::new(MockProvider::new(turns));
    let bus = EventBus::new();
    let notifier = Arc::new(CapturingNotifier::new());

    let agent = AgentService::new(
        threads.clone(),
        memory,
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        bus,
        "mock-model".to_string(),
        5,
    );

    let mut skills = SkillRegistry::new();
    skills.register(Arc::new(OneShotStubSkill));
    let skills = Arc::new(skills);

    let jobs = Arc::new(JobService::new(store.clone(), skills.clone()));
    let scheduler = JobScheduler::new(
        store.clone(),
        threads.clone(),
        agent,
        skills,
        notifier.clone(),
        Some("http://app.test".to_string()),
    );

    TestScheduler {
        scheduler,
        store,
        threads,
        jobs,
        notifier,
        provider,
    }
}

/// Consume an agent stream to the end; returns events plus the outcome.
pub async fn drain_stream(mut handle: StreamHandle) -> (Vec<StreamEvent>, RunOutcome) {
    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }
    let outcome = handle.outcome.await.unwrap_or_default();
    (events, outcome)
}
