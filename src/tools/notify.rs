use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Tool;
use crate::notify::Notifier;

pub struct NotifyTool {
    notifier: Arc<dyn Notifier>,
}

impl NotifyTool {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[derive(Deserialize)]
struct NotifyArgs {
    title: String,
    body: String,
    tag: Option<String>,
}

#[async_trait]
impl Tool for NotifyTool {
    fn name(&self) -> &str {
        "notify"
    }

    fn description(&self) -> &str {
        "Send a push notification to the user's devices"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "notify",
            "description": "Send a push notification to the user's devices. Use for things the \
                user should see promptly even when not looking at the chat.",
            "parameters": {
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Short notification title" },
                    "body": { "type": "string", "description": "Notification body text" },
                    "tag": {
                        "type": "string",
                        "description": "Optional emoji tag name, e.g. 'bell' or 'warning'"
                    }
                },
                "required": ["title", "body"],
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: NotifyArgs = serde_json::from_str(arguments)?;
        self.notifier
            .notify(&args.title, &args.body, args.tag.as_deref(), None)
            .await;
        Ok(format!("Notification sent: {}", args.title))
    }
}
