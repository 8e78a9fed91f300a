use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Tool;
use crate::memory::{MemoryService, DEFAULT_RECALL_LIMIT};
use crate::store::MemorySource;

const MAX_RECALL_LIMIT: usize = 20;

pub struct RememberTool {
    memory: Arc<MemoryService>,
}

impl RememberTool {
    pub fn new(memory: Arc<MemoryService>) -> Self {
        Self { memory }
    }
}

#[derive(Deserialize)]
struct RememberArgs {
    content: String,
    replace_id: Option<i64>,
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store one atomic fact in persistent memory"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "remember",
            "description": "Store ONE atomic fact in persistent memory. Always call recall first: \
                if a matching memory exists, pass its id as replace_id to overwrite it instead of \
                creating a near-duplicate.",
            "parameters": {
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "The fact to remember, phrased so it stands alone"
                    },
                    "replace_id": {
                        "type": "integer",
                        "description": "Id of an existing memory to overwrite (from recall)"
                    }
                },
                "required": ["content"],
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: RememberArgs = serde_json::from_str(arguments)?;
        let entry = self
            .memory
            .remember(&args.content, MemorySource::Agent, None, args.replace_id)
            .await?;
        Ok(match args.replace_id {
            Some(id) => format!("Updated memory {}: {}", id, entry.content),
            None => format!("Remembered: {}", entry.content),
        })
    }
}

pub struct RecallTool {
    memory: Arc<MemoryService>,
}

impl RecallTool {
    pub fn new(memory: Arc<MemoryService>) -> Self {
        Self { memory }
    }
}

#[derive(Deserialize)]
struct RecallArgs {
    query: String,
    limit: Option<usize>,
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Search persistent memory by meaning"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "recall",
            "description": "Search persistent memory by meaning. Returns matching memories with \
                their ids and relevance, most relevant first.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look for"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default 10, max 20)"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: RecallArgs = serde_json::from_str(arguments)?;
        let limit = args
            .limit
            .unwrap_or(DEFAULT_RECALL_LIMIT)
            .clamp(1, MAX_RECALL_LIMIT);

        let hits = self.memory.recall(&args.query, limit).await?;
        if hits.is_empty() {
            return Ok("No matching memories found.".to_string());
        }

        let mut output = format!("Found {} memories:\n", hits.len());
        for hit in hits {
            output.push_str(&format!(
                "- [id {}] {} ({:.0}% relevant)\n",
                hit.entry.id,
                hit.entry.content,
                hit.similarity * 100.0
            ));
        }
        Ok(output)
    }
}
