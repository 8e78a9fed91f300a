use super::*;

fn row_to_thread(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Thread> {
    let source: String = row.get("source");
    Ok(Thread {
        id: row.get("id"),
        title: row.get("title"),
        source: ThreadSource::parse(&source)?,
        job_run_id: row.get("job_run_id"),
        created_at: ts(&row.get::<String, _>("created_at")),
        updated_at: ts(&row.get::<String, _>("updated_at")),
    })
}

impl Store {
    pub async fn create_thread(
        &self,
        title: Option<&str>,
        source: ThreadSource,
        job_run_id: Option<i64>,
    ) -> CoreResult<Thread> {
        let now = now_str();
        let row = sqlx::query(
            "INSERT INTO threads (title, source, job_run_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(title)
        .bind(source.as_str())
        .bind(job_run_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        row_to_thread(&row)
    }

    pub async fn find_thread(&self, id: i64) -> CoreResult<Option<Thread>> {
        let row = sqlx::query("SELECT * FROM threads WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_thread).transpose()
    }

    /// Most recently updated first.
    pub async fn list_threads(&self) -> CoreResult<Vec<Thread>> {
        let rows = sqlx::query(
            "SELECT * FROM threads WHERE deleted_at IS NULL ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_thread).collect()
    }

    pub async fn update_thread_title(&self, id: i64, title: &str) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE threads SET title = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(title)
        .bind(now_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("thread", id));
        }
        Ok(())
    }

    /// Touch `updated_at` so the thread sorts to the top of the list after
    /// new activity.
    pub async fn touch_thread(&self, id: i64) -> CoreResult<()> {
        sqlx::query("UPDATE threads SET updated_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(now_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Idempotent: deleting an already-deleted thread reports not-found
    /// instead of re-stamping.
    pub async fn delete_thread(&self, id: i64) -> CoreResult<()> {
        let now = now_str();
        let result = sqlx::query(
            "UPDATE threads SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("thread", id));
        }
        Ok(())
    }
}
