//! Job administration shared by the `*_job` tools and the REST surface:
//! payload-kind validation, schedule parsing, and first-fire computation.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::cron::{next_fire, parse_schedule, Schedule};
use crate::error::{CoreError, CoreResult};
use crate::skills::SkillRegistry;
use crate::store::{Job, JobRun, Store};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobDraft {
    pub name: String,
    /// Natural shortcut, 5-field cron, RFC-3339 instant, or "in 30m".
    pub schedule: Option<String>,
    /// Explicit one-shot fire time; alternative to a one-shot `schedule`.
    pub run_at: Option<DateTime<Utc>>,
    pub prompt: Option<String>,
    pub skill_name: Option<String>,
    pub skill_config: Option<Value>,
    #[serde(default)]
    pub max_retries: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub prompt: Option<String>,
    pub skill_config: Option<Value>,
    pub enabled: Option<bool>,
    pub max_retries: Option<i64>,
}

pub struct JobService {
    store: Arc<Store>,
    skills: Arc<SkillRegistry>,
}

impl JobService {
    pub fn new(store: Arc<Store>, skills: Arc<SkillRegistry>) -> Self {
        Self { store, skills }
    }

    pub async fn create(&self, draft: JobDraft) -> CoreResult<Job> {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(CoreError::validation("job name must not be empty"));
        }

        let has_prompt = draft.prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        let has_skill = draft.skill_name.is_some();
        match (has_prompt, has_skill) {
            (true, true) => {
                return Err(CoreError::validation(
                    "a job takes either a prompt or a skill, not both",
                ))
            }
            (false, false) => {
                return Err(CoreError::validation(
                    "a job needs a prompt or a skill_name",
                ))
            }
            _ => {}
        }

        if let Some(skill_name) = draft.skill_name.as_deref() {
            if self.skills.get(skill_name).is_none() {
                return Err(CoreError::validation(format!(
                    "unknown skill '{}'",
                    skill_name
                )));
            }
        }
        if draft.max_retries < 0 {
            return Err(CoreError::validation("max_retries must be >= 0"));
        }

        let (cron_expr, first_fire) = match (draft.schedule.as_deref(), draft.run_at) {
            (Some(_), Some(_)) => {
                return Err(CoreError::validation(
                    "set either schedule or run_at, not both",
                ))
            }
            (None, None) => {
                return Err(CoreError::validation("a job needs a schedule or run_at"))
            }
            (None, Some(at)) => {
                if at <= Utc::now() {
                    return Err(CoreError::validation("run_at must be in the future"));
                }
                (None, at)
            }
            (Some(schedule), None) => match parse_schedule(schedule)? {
                Schedule::Cron(expr) => {
                    let fire = next_fire(&expr, Utc::now())?.ok_or_else(|| {
                        CoreError::validation(format!(
                            "cron expression '{}' never fires",
                            expr
                        ))
                    })?;
                    (Some(expr), fire)
                }
                Schedule::Once(at) => (None, at),
            },
        };

        let skill_config = if has_skill {
            Some(draft.skill_config.unwrap_or_else(|| Value::Object(Default::default())))
        } else {
            None
        };

        self.store
            .create_job(
                name,
                cron_expr.as_deref(),
                draft.prompt.as_deref().map(str::trim),
                draft.skill_name.as_deref(),
                skill_config.as_ref(),
                draft.max_retries,
                first_fire,
            )
            .await
    }

    pub async fn update(&self, id: i64, patch: JobPatch) -> CoreResult<Job> {
        let mut job = self
            .store
            .find_job(id)
            .await?
            .ok_or_else(|| CoreError::not_found("job", id))?;

        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(CoreError::validation("job name must not be empty"));
            }
            job.name = name;
        }
        if let Some(schedule) = patch.schedule.as_deref() {
            match parse_schedule(schedule)? {
                Schedule::Cron(expr) => {
                    let fire = next_fire(&expr, Utc::now())?.ok_or_else(|| {
                        CoreError::validation(format!("cron expression '{}' never fires", expr))
                    })?;
                    job.cron_expr = Some(expr);
                    job.next_run_at = fire;
                }
                Schedule::Once(at) => {
                    job.cron_expr = None;
                    job.next_run_at = at;
                }
            }
        }
        if let Some(prompt) = patch.prompt {
            if job.is_skill_job() {
                return Err(CoreError::validation(
                    "cannot set a prompt on a skill job",
                ));
            }
            job.prompt = Some(prompt);
        }
        if let Some(config) = patch.skill_config {
            if !job.is_skill_job() {
                return Err(CoreError::validation(
                    "cannot set skill_config on a prompt job",
                ));
            }
            job.skill_config = Some(config);
        }
        if let Some(enabled) = patch.enabled {
            job.enabled = enabled;
        }
        if let Some(max_retries) = patch.max_retries {
            if max_retries < 0 {
                return Err(CoreError::validation("max_retries must be >= 0"));
            }
            job.max_retries = max_retries;
        }

        self.store.update_job(&job).await
    }

    pub async fn list(&self) -> CoreResult<Vec<Job>> {
        self.store.list_jobs().await
    }

    /// A job with its run history, most recent run first.
    pub async fn get(&self, id: i64) -> CoreResult<(Job, Vec<JobRun>)> {
        let job = self
            .store
            .find_job(id)
            .await?
            .ok_or_else(|| CoreError::not_found("job", id))?;
        let runs = self.store.runs_for_job(id).await?;
        Ok((job, runs))
    }

    pub async fn delete(&self, id: i64) -> CoreResult<()> {
        self.store.delete_job(id).await
    }
}
