use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Tool;
use crate::jobs::{JobDraft, JobPatch, JobService};
use crate::store::Job;

fn describe_job(job: &Job) -> String {
    let payload = match (&job.prompt, &job.skill_name) {
        (Some(prompt), _) => format!("prompt: {}", prompt),
        (None, Some(skill)) => format!("skill: {}", skill),
        (None, None) => "(no payload)".to_string(),
    };
    let schedule = job
        .cron_expr
        .as_deref()
        .map(|c| format!("cron '{}'", c))
        .unwrap_or_else(|| "one-shot".to_string());
    let status = if job.enabled { "enabled" } else { "disabled" };
    format!(
        "- [id {}] {} ({}, {})\n  {}\n  Next run: {}\n  Last run: {}",
        job.id,
        job.name,
        schedule,
        status,
        payload,
        job.next_run_at.format("%Y-%m-%d %H:%M UTC"),
        job.last_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string()),
    )
}

pub struct ListJobsTool {
    jobs: Arc<JobService>,
}

impl ListJobsTool {
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for ListJobsTool {
    fn name(&self) -> &str {
        "list_jobs"
    }

    fn description(&self) -> &str {
        "List all scheduled jobs"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "list_jobs",
            "description": "List all scheduled jobs with their ids, schedules, and payloads.",
            "parameters": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, _arguments: &str) -> anyhow::Result<String> {
        let jobs = self.jobs.list().await?;
        if jobs.is_empty() {
            return Ok("No scheduled jobs.".to_string());
        }
        let mut output = format!("Scheduled jobs ({}):\n", jobs.len());
        for job in &jobs {
            output.push_str(&describe_job(job));
            output.push('\n');
        }
        Ok(output)
    }
}

pub struct CreateJobTool {
    jobs: Arc<JobService>,
}

impl CreateJobTool {
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for CreateJobTool {
    fn name(&self) -> &str {
        "create_job"
    }

    fn description(&self) -> &str {
        "Create a scheduled job: a prompt to run, or a skill to execute"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "create_job",
            "description": "Create a scheduled job. Give it either a prompt (the assistant wakes \
                up and handles it) or a skill_name with skill_config. Schedules accept natural \
                shortcuts ('daily at 9am', 'every 5m', 'in 2h'), 5-field cron, or an ISO-8601 \
                instant for one-shots.",
            "parameters": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Human-readable job name" },
                    "schedule": {
                        "type": "string",
                        "description": "When to run: 'daily at 9am', '0 8 * * *', 'in 30m', ..."
                    },
                    "prompt": {
                        "type": "string",
                        "description": "What to do when the job fires (prompt jobs)"
                    },
                    "skill_name": {
                        "type": "string",
                        "description": "Registered skill to execute instead of a prompt"
                    },
                    "skill_config": {
                        "type": "object",
                        "description": "Configuration document for the skill"
                    },
                    "max_retries": {
                        "type": "integer",
                        "description": "Retry budget on failure (default 0)"
                    }
                },
                "required": ["name", "schedule"],
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let draft: JobDraft = serde_json::from_str(arguments)?;
        let job = self.jobs.create(draft).await?;
        Ok(format!(
            "Created job {} '{}'. Next run: {}",
            job.id,
            job.name,
            job.next_run_at.format("%Y-%m-%d %H:%M UTC")
        ))
    }
}

pub struct UpdateJobTool {
    jobs: Arc<JobService>,
}

impl UpdateJobTool {
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[derive(Deserialize)]
struct UpdateJobArgs {
    id: i64,
    #[serde(flatten)]
    patch: JobPatch,
}

#[async_trait]
impl Tool for UpdateJobTool {
    fn name(&self) -> &str {
        "update_job"
    }

    fn description(&self) -> &str {
        "Update a scheduled job's name, schedule, prompt, or enabled state"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "update_job",
            "description": "Update a scheduled job. Only the provided fields change. Changing the \
                schedule recomputes the next run time.",
            "parameters": {
                "type": "object",
                "properties": {
                    "id": { "type": "integer", "description": "Job id (from list_jobs)" },
                    "name": { "type": "string" },
                    "schedule": { "type": "string" },
                    "prompt": { "type": "string" },
                    "skill_config": { "type": "object" },
                    "enabled": { "type": "boolean" },
                    "max_retries": { "type": "integer" }
                },
                "required": ["id"],
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: UpdateJobArgs = serde_json::from_str(arguments)?;
        let job = self.jobs.update(args.id, args.patch).await?;
        Ok(format!(
            "Updated job {} '{}'. Next run: {}",
            job.id,
            job.name,
            job.next_run_at.format("%Y-%m-%d %H:%M UTC")
        ))
    }
}

pub struct DeleteJobTool {
    jobs: Arc<JobService>,
}

impl DeleteJobTool {
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[derive(Deserialize)]
struct DeleteJobArgs {
    id: i64,
}

#[async_trait]
impl Tool for DeleteJobTool {
    fn name(&self) -> &str {
        "delete_job"
    }

    fn description(&self) -> &str {
        "Delete a scheduled job"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "delete_job",
            "description": "Delete a scheduled job by id.",
            "parameters": {
                "type": "object",
                "properties": {
                    "id": { "type": "integer", "description": "Job id (from list_jobs)" }
                },
                "required": ["id"],
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: DeleteJobArgs = serde_json::from_str(arguments)?;
        self.jobs.delete(args.id).await?;
        Ok(format!("Deleted job {}", args.id))
    }
}
