//! In-process, long-running, config-driven tasks executed by the scheduler
//! in place of an LM run.

mod departure;

pub use departure::DepartureCheckSkill;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// The slice of a job a skill is allowed to see.
#[derive(Debug, Clone)]
pub struct SkillJob {
    pub id: i64,
    pub name: String,
    pub config: Value,
}

pub struct SkillContext {
    pub job: SkillJob,
    /// Flips to true on scheduler shutdown; long-running skills must observe
    /// it in their sleep points and exit cooperatively.
    pub cancel: watch::Receiver<bool>,
}

impl SkillContext {
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillOutcome {
    pub success: bool,
    pub message: String,
    /// One-shot style: a successful outcome may also switch the job off.
    pub disable_job: bool,
}

impl SkillOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            disable_job: false,
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            disable_job: true,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            disable_job: false,
        }
    }
}

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the skill's `skill_config` document.
    fn config_schema(&self) -> Value;
    async fn execute(&self, ctx: SkillContext) -> anyhow::Result<SkillOutcome>;
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
    order: Vec<String>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        if self.skills.insert(name.clone(), skill).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    /// Registration order.
    pub fn list(&self) -> Vec<Arc<dyn Skill>> {
        self.order
            .iter()
            .filter_map(|name| self.skills.get(name))
            .cloned()
            .collect()
    }
}
