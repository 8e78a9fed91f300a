//! Idempotent schema setup. Every statement is safe to re-run on an
//! existing database, so startup always applies the full list.

use sqlx::SqlitePool;

use crate::error::CoreResult;

pub async fn apply(pool: &SqlitePool) -> CoreResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS threads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            source TEXT NOT NULL CHECK (source IN ('user', 'wake')),
            job_run_id INTEGER,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id INTEGER NOT NULL REFERENCES threads(id),
            role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant', 'tool')),
            model TEXT,
            content TEXT NOT NULL,
            deleted_at TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS memory_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            source TEXT NOT NULL CHECK (source IN ('agent', 'user')),
            thread_id INTEGER,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            cron_expr TEXT,
            prompt TEXT,
            skill_name TEXT,
            skill_config TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            max_retries INTEGER NOT NULL DEFAULT 0,
            next_run_at TEXT NOT NULL,
            last_run_at TEXT,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS job_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL REFERENCES jobs(id),
            scheduled_for TEXT NOT NULL,
            locked_until TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'running', 'completed', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            thread_id INTEGER,
            error TEXT,
            started_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (job_id, scheduled_for)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_runs_status ON job_runs(status, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let pool = memory_pool().await;
        apply(&pool).await.unwrap();
        apply(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn role_check_constraint_rejects_unknown_roles() {
        let pool = memory_pool().await;
        apply(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO threads (source, created_at, updated_at) VALUES ('user', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query(
            "INSERT INTO messages (thread_id, role, content, created_at) VALUES (1, 'narrator', '{}', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn job_runs_unique_on_job_and_tick() {
        let pool = memory_pool().await;
        apply(&pool).await.unwrap();

        let insert = "INSERT INTO job_runs (job_id, scheduled_for, created_at) VALUES (1, '2026-03-01T08:00:00+00:00', '2026-03-01T08:00:00+00:00')";
        sqlx::query(insert).execute(&pool).await.unwrap();
        assert!(sqlx::query(insert).execute(&pool).await.is_err());
    }
}
