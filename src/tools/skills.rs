use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Tool;
use crate::skills::SkillRegistry;

pub struct ListSkillsTool {
    skills: Arc<SkillRegistry>,
}

impl ListSkillsTool {
    pub fn new(skills: Arc<SkillRegistry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List the skills that can run as scheduled jobs"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "list_skills",
            "description": "List the registered skills that create_job can schedule, with the \
                config schema each one expects.",
            "parameters": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, _arguments: &str) -> anyhow::Result<String> {
        let skills = self.skills.list();
        if skills.is_empty() {
            return Ok("No skills registered.".to_string());
        }
        let mut output = format!("Registered skills ({}):\n", skills.len());
        for skill in skills {
            output.push_str(&format!(
                "- {}: {}\n  config schema: {}\n",
                skill.name(),
                skill.description(),
                skill.config_schema()
            ));
        }
        Ok(output)
    }
}
