//! Typed tools the LM may invoke mid-stream. Implementations never let an
//! error cross the boundary to the LM: failures become human-readable
//! strings the model can read and react to.

mod datetime;
mod directions;
mod fetch_url;
mod jobs;
mod memory;
mod notify;
mod skills;

pub use datetime::CurrentDatetimeTool;
pub use directions::DirectionsTool;
pub use fetch_url::FetchUrlTool;
pub use jobs::{CreateJobTool, DeleteJobTool, ListJobsTool, UpdateJobTool};
pub use memory::{RecallTool, RememberTool};
pub use notify::NotifyTool;
pub use skills::ListSkillsTool;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// OpenAI-format function schema: `{name, description, parameters}`.
    fn schema(&self) -> Value;
    /// Execute with a raw JSON arguments string; returns text for the LM.
    async fn call(&self, arguments: &str) -> anyhow::Result<String>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Tool definitions in the wire format the chat API expects, in
    /// registration order.
    pub fn definitions(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| json!({ "type": "function", "function": tool.schema() }))
            .collect()
    }

    /// Invoke a tool by name. Unknown tools and tool errors both come back
    /// as failure text rather than an `Err` — the LM is the consumer.
    pub async fn execute(&self, call_id: &str, name: &str, arguments: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(call_id, tool = name, "LM called an unknown tool");
            return format!("Error: unknown tool '{}'", name);
        };

        let started = Instant::now();
        let result = tool.call(arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(call_id, tool = name, elapsed_ms, "Tool call succeeded");
                output
            }
            Err(e) => {
                warn!(call_id, tool = name, elapsed_ms, error = %e, "Tool call failed");
                format!("Error: {}", e)
            }
        }
    }
}
