use super::*;

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Job> {
    let skill_config: Option<String> = row.get("skill_config");
    let skill_config = skill_config
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| CoreError::Internal(format!("corrupt skill config: {}", e)))?;
    Ok(Job {
        id: row.get("id"),
        name: row.get("name"),
        cron_expr: row.get("cron_expr"),
        prompt: row.get("prompt"),
        skill_name: row.get("skill_name"),
        skill_config,
        enabled: row.get::<i64, _>("enabled") != 0,
        max_retries: row.get("max_retries"),
        next_run_at: ts(&row.get::<String, _>("next_run_at")),
        last_run_at: opt_ts(row.get("last_run_at")),
        created_at: ts(&row.get::<String, _>("created_at")),
        updated_at: ts(&row.get::<String, _>("updated_at")),
    })
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> CoreResult<JobRun> {
    let status: String = row.get("status");
    Ok(JobRun {
        id: row.get("id"),
        job_id: row.get("job_id"),
        scheduled_for: ts(&row.get::<String, _>("scheduled_for")),
        locked_until: opt_ts(row.get("locked_until")),
        status: RunStatus::parse(&status)?,
        retry_count: row.get("retry_count"),
        thread_id: row.get("thread_id"),
        error: row.get("error"),
        started_at: opt_ts(row.get("started_at")),
        completed_at: opt_ts(row.get("completed_at")),
        created_at: ts(&row.get::<String, _>("created_at")),
    })
}

/// Lease duration on a claimed run, in minutes. A crashed executor's run
/// becomes reclaimable once this much time passes without a refresh.
const RUN_LEASE_MINUTES: i64 = 5;

fn lease_expiry(from: DateTime<Utc>) -> String {
    (from + chrono::Duration::minutes(RUN_LEASE_MINUTES)).to_rfc3339()
}

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_job(
        &self,
        name: &str,
        cron_expr: Option<&str>,
        prompt: Option<&str>,
        skill_name: Option<&str>,
        skill_config: Option<&Value>,
        max_retries: i64,
        next_run_at: DateTime<Utc>,
    ) -> CoreResult<Job> {
        let now = now_str();
        let row = sqlx::query(
            "INSERT INTO jobs (name, cron_expr, prompt, skill_name, skill_config, enabled, max_retries, next_run_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(name)
        .bind(cron_expr)
        .bind(prompt)
        .bind(skill_name)
        .bind(skill_config.map(|v| v.to_string()))
        .bind(max_retries)
        .bind(next_run_at.to_rfc3339())
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        row_to_job(&row)
    }

    pub async fn find_job(&self, id: i64) -> CoreResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    pub async fn list_jobs(&self) -> CoreResult<Vec<Job>> {
        let rows =
            sqlx::query("SELECT * FROM jobs WHERE deleted_at IS NULL ORDER BY next_run_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_job).collect()
    }

    pub async fn jobs_due(&self, now: DateTime<Utc>) -> CoreResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs
             WHERE enabled = 1 AND deleted_at IS NULL AND next_run_at <= ?
             ORDER BY id ASC",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Writes every mutable column from the given job back to its row.
    /// Callers merge partial updates into a fetched `Job` first.
    pub async fn update_job(&self, job: &Job) -> CoreResult<Job> {
        let row = sqlx::query(
            "UPDATE jobs SET name = ?, cron_expr = ?, prompt = ?, skill_name = ?,
                skill_config = ?, enabled = ?, max_retries = ?, next_run_at = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL
             RETURNING *",
        )
        .bind(&job.name)
        .bind(&job.cron_expr)
        .bind(&job.prompt)
        .bind(&job.skill_name)
        .bind(job.skill_config.as_ref().map(|v| v.to_string()))
        .bind(job.enabled as i64)
        .bind(job.max_retries)
        .bind(job.next_run_at.to_rfc3339())
        .bind(now_str())
        .bind(job.id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_job(&row),
            None => Err(CoreError::not_found("job", job.id)),
        }
    }

    pub async fn set_job_enabled(&self, id: i64, enabled: bool) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET enabled = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(enabled as i64)
        .bind(now_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("job", id));
        }
        Ok(())
    }

    pub async fn set_job_next_run(&self, id: i64, next_run_at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET next_run_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(next_run_at.to_rfc3339())
        .bind(now_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_job_last_run(&self, id: i64, at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET last_run_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(at.to_rfc3339())
        .bind(now_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_job(&self, id: i64) -> CoreResult<()> {
        let now = now_str();
        let result = sqlx::query(
            "UPDATE jobs SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("job", id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job runs
    // -----------------------------------------------------------------------

    /// Insert a pending run for `(job_id, scheduled_for)`. Creation is
    /// suppressed when the pair already exists (unique constraint) or when
    /// another run for the same job is currently running, which prevents a
    /// slow job from overlapping itself. Returns whether a row was inserted.
    pub async fn create_run_idempotent(
        &self,
        job_id: i64,
        scheduled_for: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO job_runs (job_id, scheduled_for, status, created_at)
             SELECT ?, ?, 'pending', ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM job_runs WHERE job_id = ? AND status = 'running'
             )
             ON CONFLICT (job_id, scheduled_for) DO NOTHING",
        )
        .bind(job_id)
        .bind(scheduled_for.to_rfc3339())
        .bind(now_str())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim the oldest pending run: mark it running, stamp
    /// `started_at`, and take a lease. The single UPDATE statement is the
    /// claim — SQLite serializes writers, so two claimers cannot both see
    /// the row as pending.
    pub async fn claim_pending_run(&self) -> CoreResult<Option<JobRun>> {
        let now = Utc::now();
        let row = sqlx::query(
            "UPDATE job_runs
             SET status = 'running', started_at = ?, locked_until = ?
             WHERE id = (SELECT id FROM job_runs WHERE status = 'pending' ORDER BY id ASC LIMIT 1)
               AND status = 'pending'
             RETURNING *",
        )
        .bind(now.to_rfc3339())
        .bind(lease_expiry(now))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    pub async fn refresh_run_lock(&self, id: i64) -> CoreResult<()> {
        sqlx::query("UPDATE job_runs SET locked_until = ? WHERE id = ? AND status = 'running'")
            .bind(lease_expiry(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Return expired running rows to pending. This is the sole recovery
    /// path after a process crash.
    pub async fn reset_abandoned_runs(&self) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE job_runs SET status = 'pending', locked_until = NULL
             WHERE status = 'running' AND locked_until < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn complete_run(&self, id: i64, thread_id: Option<i64>) -> CoreResult<()> {
        sqlx::query(
            "UPDATE job_runs
             SET status = 'completed', completed_at = ?, thread_id = ?, locked_until = NULL
             WHERE id = ?",
        )
        .bind(now_str())
        .bind(thread_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_run(&self, id: i64, error: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE job_runs
             SET status = 'failed', completed_at = ?, error = ?,
                 retry_count = retry_count + 1, locked_until = NULL
             WHERE id = ?",
        )
        .bind(now_str())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_run(&self, id: i64) -> CoreResult<Option<JobRun>> {
        let row = sqlx::query("SELECT * FROM job_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    /// Run history for a job, most recent first.
    pub async fn runs_for_job(&self, job_id: i64) -> CoreResult<Vec<JobRun>> {
        let rows = sqlx::query("SELECT * FROM job_runs WHERE job_id = ? ORDER BY id DESC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_run).collect()
    }
}
