//! Typed SQLite access to threads, messages, memory entries, jobs, and job
//! runs. No business logic lives here.
//!
//! Conventions shared by every entity:
//! - ids are `INTEGER PRIMARY KEY AUTOINCREMENT` (monotonic i64)
//! - timestamps are RFC-3339 UTC strings in TEXT columns
//! - soft deletion via a nullable `deleted_at`; every read filters
//!   `deleted_at IS NULL` unless the operation explicitly says otherwise
//! - content-changing mutations bump `updated_at`

mod jobs;
mod memories;
mod messages;
mod migrations;
mod threads;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the database at `path` and apply the
    /// schema. WAL mode keeps readers unblocked during scheduler writes.
    pub async fn connect(path: &str) -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(CoreError::Storage)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        migrations::apply(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Entity types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadSource {
    User,
    Wake,
}

impl ThreadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadSource::User => "user",
            ThreadSource::Wake => "wake",
        }
    }

    fn parse(raw: &str) -> CoreResult<Self> {
        match raw {
            "user" => Ok(ThreadSource::User),
            "wake" => Ok(ThreadSource::Wake),
            other => Err(CoreError::Internal(format!(
                "unknown thread source '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub id: i64,
    pub title: Option<String>,
    pub source: ThreadSource,
    pub job_run_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    fn parse(raw: &str) -> CoreResult<Self> {
        match raw {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(CoreError::Internal(format!(
                "unknown message role '{}'",
                other
            ))),
        }
    }
}

/// A persisted message. `content` is the structured document and the source
/// of truth; the `role` column mirrors `content.role` for filtering only.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub thread_id: i64,
    pub role: MessageRole,
    pub model: Option<String>,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Agent,
    User,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Agent => "agent",
            MemorySource::User => "user",
        }
    }

    fn parse(raw: &str) -> CoreResult<Self> {
        match raw {
            "agent" => Ok(MemorySource::Agent),
            "user" => Ok(MemorySource::User),
            other => Err(CoreError::Internal(format!(
                "unknown memory source '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub source: MemorySource,
    pub thread_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    /// Present iff the job is recurring.
    pub cron_expr: Option<String>,
    pub prompt: Option<String>,
    pub skill_name: Option<String>,
    pub skill_config: Option<Value>,
    pub enabled: bool,
    pub max_retries: i64,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Exactly one of {prompt, skill} is the payload; enforced at creation.
    pub fn is_skill_job(&self) -> bool {
        self.skill_name.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> CoreResult<Self> {
        match raw {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(CoreError::Internal(format!(
                "unknown run status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub id: i64,
    pub job_id: i64,
    /// The nominal fire instant this run represents.
    pub scheduled_for: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub retry_count: i64,
    pub thread_id: Option<i64>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(ts)
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_and_role_round_trip() {
        assert_eq!(
            ThreadSource::parse(ThreadSource::Wake.as_str()).unwrap(),
            ThreadSource::Wake
        );
        assert_eq!(
            MessageRole::parse(MessageRole::Assistant.as_str()).unwrap(),
            MessageRole::Assistant
        );
        assert_eq!(
            RunStatus::parse(RunStatus::Completed.as_str()).unwrap(),
            RunStatus::Completed
        );
        assert!(MessageRole::parse("narrator").is_err());
    }

    #[test]
    fn timestamps_parse_rfc3339() {
        let now = Utc::now();
        let parsed = ts(&now.to_rfc3339());
        assert_eq!(parsed.timestamp(), now.timestamp());
    }
}
