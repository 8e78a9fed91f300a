use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};

use super::Tool;

pub struct CurrentDatetimeTool;

#[async_trait]
impl Tool for CurrentDatetimeTool {
    fn name(&self) -> &str {
        "current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current local date and time"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "current_datetime",
            "description": "Get the current local date and time.",
            "parameters": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, _arguments: &str) -> anyhow::Result<String> {
        Ok(Local::now().format("%A, %B %-d, %Y at %-I:%M %p (%Z)").to_string())
    }
}
