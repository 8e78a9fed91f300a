//! Durable job runner. Every tick: reclaim expired leases, enqueue due jobs
//! (exactly one pending run per nominal tick), claim at most one run, and
//! execute it under a refreshing lease. Crash recovery is the lease alone —
//! a dead executor's run returns to pending within one lease window.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::agent::{AgentService, StreamHandle};
use crate::cron::next_fire;
use crate::error::CoreResult;
use crate::notify::Notifier;
use crate::skills::{SkillContext, SkillJob, SkillRegistry};
use crate::store::{Job, JobRun, Store, ThreadSource};
use crate::threads::ThreadService;

const TICK_INTERVAL: Duration = Duration::from_secs(30);
const LEASE_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
const NOTIFICATION_BODY_LIMIT: usize = 200;

pub struct JobScheduler {
    store: Arc<Store>,
    threads: Arc<ThreadService>,
    agent: Arc<AgentService>,
    skills: Arc<SkillRegistry>,
    notifier: Arc<dyn Notifier>,
    app_url: Option<String>,
    cancel_tx: watch::Sender<bool>,
    tick_interval: Duration,
}

impl JobScheduler {
    pub fn new(
        store: Arc<Store>,
        threads: Arc<ThreadService>,
        agent: Arc<AgentService>,
        skills: Arc<SkillRegistry>,
        notifier: Arc<dyn Notifier>,
        app_url: Option<String>,
    ) -> Arc<Self> {
        let (cancel_tx, _) = watch::channel(false);
        Arc::new(Self {
            store,
            threads,
            agent,
            skills,
            notifier,
            app_url,
            cancel_tx,
            tick_interval: TICK_INTERVAL,
        })
    }

    /// Begin the tick loop; the first tick fires immediately. Ticks
    /// serialize — a tick in progress delays the next.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut cancel = self.cancel_tx.subscribe();
        tokio::spawn(async move {
            info!(interval_secs = self.tick_interval.as_secs(), "Scheduler started");
            loop {
                if let Err(e) = self.tick().await {
                    // A storage hiccup ends the tick; the next one retries.
                    error!(error = %e, "Scheduler tick failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.tick_interval) => {}
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            info!("Scheduler stopped");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Cancel the tick loop and every in-flight run's cancel signal. The
    /// lease reclaims whatever does not exit in time.
    pub fn stop(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub(crate) async fn tick(&self) -> CoreResult<()> {
        let reclaimed = self.store.reset_abandoned_runs().await?;
        if reclaimed > 0 {
            warn!(count = reclaimed, "Reclaimed abandoned job runs");
        }

        let now = Utc::now();
        for job in self.store.jobs_due(now).await? {
            let inserted = self
                .store
                .create_run_idempotent(job.id, job.next_run_at)
                .await?;
            if inserted {
                info!(job = %job.name, scheduled_for = %job.next_run_at, "Enqueued job run");
            }

            match job.cron_expr.as_deref() {
                Some(expr) => match next_fire(expr, now)? {
                    Some(next) => self.store.set_job_next_run(job.id, next).await?,
                    None => {
                        warn!(job = %job.name, cron = expr, "Cron admits no future fire, disabling job");
                        self.store.set_job_enabled(job.id, false).await?;
                    }
                },
                // One-shot jobs have no future fire by construction.
                None => self.store.set_job_enabled(job.id, false).await?,
            }
        }

        if let Some(run) = self.store.claim_pending_run().await? {
            self.execute_run(run).await?;
        }
        Ok(())
    }

    async fn execute_run(&self, run: JobRun) -> CoreResult<()> {
        let Some(job) = self.store.find_job(run.job_id).await? else {
            warn!(run_id = run.id, job_id = run.job_id, "Claimed run for a missing job");
            self.store.fail_run(run.id, "Job not found").await?;
            return Ok(());
        };

        info!(run_id = run.id, job = %job.name, "Executing job run");
        let refresher = self.spawn_lease_refresher(run.id);

        let result = if job.is_skill_job() {
            self.execute_skill_run(&run, &job).await
        } else {
            self.execute_prompt_run(&run, &job).await
        };
        refresher.abort();

        match result {
            Ok(RunResult::Completed) => Ok(()),
            Ok(RunResult::Cancelled) => {
                // Shutdown mid-run: leave the row running; the lease expires
                // and a later tick reclaims it.
                info!(run_id = run.id, job = %job.name, "Run cancelled by shutdown");
                Ok(())
            }
            Err(message) => {
                self.store.fail_run(run.id, &message).await?;
                let failed = self.store.find_run(run.id).await?;
                let retry_count = failed.map(|r| r.retry_count).unwrap_or(i64::MAX);
                if retry_count >= job.max_retries {
                    warn!(
                        run_id = run.id,
                        job = %job.name,
                        retry_count,
                        "Job run failed terminally"
                    );
                    self.notifier
                        .notify(
                            &format!("Job failed: {}", job.name),
                            truncate(&message, NOTIFICATION_BODY_LIMIT),
                            Some("x"),
                            None,
                        )
                        .await;
                } else {
                    warn!(
                        run_id = run.id,
                        job = %job.name,
                        retry_count,
                        max_retries = job.max_retries,
                        "Job run failed; retries remain but are not auto-scheduled"
                    );
                }
                Ok(())
            }
        }
    }

    async fn execute_prompt_run(&self, run: &JobRun, job: &Job) -> Result<RunResult, String> {
        let prompt = job.prompt.as_deref().unwrap_or_default();
        let thread = self
            .threads
            .create(None, ThreadSource::Wake, Some(run.id))
            .await
            .map_err(|e| e.to_string())?;

        let handle = self
            .agent
            .run_stream(thread.id, prompt)
            .await
            .map_err(|e| e.to_string())?;

        match self.drain(handle).await {
            DrainResult::Completed(error) => {
                if let Some(message) = error {
                    return Err(message);
                }
            }
            DrainResult::Cancelled => return Ok(RunResult::Cancelled),
        }

        self.store
            .complete_run(run.id, Some(thread.id))
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .set_job_last_run(job.id, Utc::now())
            .await
            .map_err(|e| e.to_string())?;

        let click_url = self
            .app_url
            .as_deref()
            .map(|base| format!("{}/threads/{}", base.trim_end_matches('/'), thread.id));
        self.notifier
            .notify(
                &format!("Job completed: {}", job.name),
                truncate(prompt, NOTIFICATION_BODY_LIMIT),
                Some("white_check_mark"),
                click_url.as_deref(),
            )
            .await;
        Ok(RunResult::Completed)
    }

    async fn execute_skill_run(&self, run: &JobRun, job: &Job) -> Result<RunResult, String> {
        let skill_name = job.skill_name.as_deref().unwrap_or_default();
        let Some(skill) = self.skills.get(skill_name) else {
            return Err(format!("Unknown skill: {}", skill_name));
        };

        let ctx = SkillContext {
            job: SkillJob {
                id: job.id,
                name: job.name.clone(),
                config: job.skill_config.clone().unwrap_or(Value::Null),
            },
            cancel: self.cancel_tx.subscribe(),
        };

        let outcome = skill.execute(ctx).await.map_err(|e| e.to_string())?;
        if !outcome.success {
            return Err(outcome.message);
        }

        if outcome.disable_job {
            self.store
                .set_job_enabled(job.id, false)
                .await
                .map_err(|e| e.to_string())?;
        }
        // Skills produce no thread; they decide themselves whether to notify.
        self.store
            .complete_run(run.id, None)
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .set_job_last_run(job.id, Utc::now())
            .await
            .map_err(|e| e.to_string())?;
        info!(run_id = run.id, job = %job.name, message = %outcome.message, "Skill run completed");
        Ok(RunResult::Completed)
    }

    /// Consume every stream event (they go nowhere) and resolve the outcome.
    async fn drain(&self, mut handle: StreamHandle) -> DrainResult {
        let mut cancel = self.cancel_tx.subscribe();
        loop {
            tokio::select! {
                event = handle.events.recv() => {
                    if event.is_none() {
                        break;
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        // Dropping the handle cancels the agent run.
                        return DrainResult::Cancelled;
                    }
                }
            }
        }
        let error = handle.outcome.await.ok().and_then(|o| o.error);
        DrainResult::Completed(error)
    }

    fn spawn_lease_refresher(&self, run_id: i64) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LEASE_REFRESH_INTERVAL);
            interval.tick().await; // immediate first tick is a no-op
            loop {
                interval.tick().await;
                if let Err(e) = store.refresh_run_lock(run_id).await {
                    warn!(run_id, error = %e, "Failed to refresh run lease");
                }
            }
        })
    }
}

enum RunResult {
    Completed,
    Cancelled,
}

enum DrainResult {
    Completed(Option<String>),
    Cancelled,
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobDraft;
    use crate::store::RunStatus;
    use crate::testing::{test_scheduler, MockTurn, TestScheduler};

    fn prompt_draft(name: &str, schedule: &str, prompt: &str) -> JobDraft {
        JobDraft {
            name: name.to_string(),
            schedule: Some(schedule.to_string()),
            prompt: Some(prompt.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn due_job_enqueues_executes_and_advances_cron() {
        let TestScheduler {
            scheduler,
            store,
            jobs,
            threads,
            notifier,
            ..
        } = test_scheduler(vec![MockTurn::text("morning report ready")]).await;

        let job = jobs
            .create(prompt_draft("morning", "0 8 * * *", "status"))
            .await
            .unwrap();
        // Make the job due now.
        let fire_at = Utc::now() - chrono::Duration::seconds(1);
        store.set_job_next_run(job.id, fire_at).await.unwrap();

        // Tick 1: the run is enqueued with the nominal fire time, the cron
        // advances, and the same tick claims and executes it.
        scheduler.tick().await.unwrap();

        let runs = store.runs_for_job(job.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].scheduled_for.timestamp(), fire_at.timestamp());
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert!(runs[0].thread_id.is_some());

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert!(job.next_run_at > Utc::now());
        assert!(job.last_run_at.is_some());

        // The wake thread holds the assistant reply.
        let thread = threads
            .get(runs[0].thread_id.unwrap())
            .await
            .unwrap();
        assert_eq!(thread.source, ThreadSource::Wake);
        assert_eq!(thread.job_run_id, Some(runs[0].id));
        let messages = threads.messages(thread.id).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.content["content"] == "morning report ready"));

        // Success notification with click-through into the thread.
        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Job completed: morning");
        assert_eq!(sent[0].body, "status");
        assert_eq!(sent[0].tag.as_deref(), Some("white_check_mark"));
        assert_eq!(
            sent[0].click_url.as_deref(),
            Some(format!("http://app.test/threads/{}", thread.id).as_str())
        );
    }

    #[tokio::test]
    async fn duplicate_ticks_do_not_stack_runs() {
        let TestScheduler {
            scheduler,
            store,
            jobs,
            ..
        } = test_scheduler(vec![MockTurn::text("a"), MockTurn::text("b")]).await;

        let job = jobs
            .create(prompt_draft("hourly", "0 * * * *", "check"))
            .await
            .unwrap();
        store
            .set_job_next_run(job.id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        scheduler.tick().await.unwrap();
        scheduler.tick().await.unwrap();

        // The cron advanced after the first tick, so only one run exists.
        assert_eq!(store.runs_for_job(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_shot_job_fires_once_and_disables() {
        let TestScheduler {
            scheduler,
            store,
            jobs,
            ..
        } = test_scheduler(vec![MockTurn::text("reminder sent")]).await;

        let job = jobs
            .create(JobDraft {
                name: "remind".to_string(),
                schedule: Some("in 1m".to_string()),
                prompt: Some("remind me".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(job.cron_expr.is_none());
        store
            .set_job_next_run(job.id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        scheduler.tick().await.unwrap();

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert!(!job.enabled);
        let runs = store.runs_for_job(job.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn abandoned_run_recovers_and_executes_exactly_once() {
        let TestScheduler {
            scheduler,
            store,
            jobs,
            ..
        } = test_scheduler(vec![MockTurn::text("recovered")]).await;

        let job = jobs
            .create(prompt_draft("crashy", "0 * * * *", "work"))
            .await
            .unwrap();
        store.create_run_idempotent(job.id, Utc::now()).await.unwrap();
        let run = store.claim_pending_run().await.unwrap().unwrap();

        // Simulate a crashed executor: running with an expired lease.
        sqlx::query("UPDATE job_runs SET locked_until = ? WHERE id = ?")
            .bind((Utc::now() - chrono::Duration::minutes(1)).to_rfc3339())
            .bind(run.id)
            .execute(&store.pool())
            .await
            .unwrap();

        // One tick reclaims and re-executes it.
        scheduler.tick().await.unwrap();
        let run = store.find_run(run.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        // Nothing left to execute.
        scheduler.tick().await.unwrap();
        assert_eq!(store.runs_for_job(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_skill_fails_without_invoking_the_agent() {
        let TestScheduler {
            scheduler,
            store,
            provider,
            notifier,
            ..
        } = test_scheduler(vec![MockTurn::text("should never run")]).await;

        // Insert the job row directly; JobService would reject the name.
        let job = store
            .create_job(
                "ghost",
                Some("0 * * * *"),
                None,
                Some("nope"),
                Some(&serde_json::json!({})),
                0,
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        scheduler.tick().await.unwrap();

        let runs = store.runs_for_job(job.id).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("Unknown skill: nope"));
        assert_eq!(provider.call_count().await, 0);

        // retry_count 1 >= max_retries 0: terminal failure notification.
        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Job failed: ghost");
        assert_eq!(sent[0].tag.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn missing_job_fails_the_run() {
        let TestScheduler {
            scheduler, store, jobs, ..
        } = test_scheduler(vec![]).await;

        let job = jobs
            .create(prompt_draft("doomed", "0 * * * *", "x"))
            .await
            .unwrap();
        store.create_run_idempotent(job.id, Utc::now()).await.unwrap();
        store.delete_job(job.id).await.unwrap();

        scheduler.tick().await.unwrap();

        let runs = store.runs_for_job(job.id).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("Job not found"));
    }

    #[tokio::test]
    async fn failed_run_with_retries_remaining_skips_notification() {
        let TestScheduler {
            scheduler,
            store,
            notifier,
            ..
        } = test_scheduler(vec![]).await;

        let job = store
            .create_job(
                "resilient",
                Some("0 * * * *"),
                None,
                Some("nope"),
                None,
                3,
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        scheduler.tick().await.unwrap();

        let runs = store.runs_for_job(job.id).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].retry_count, 1);
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn skill_run_completes_and_can_disable_its_job() {
        let TestScheduler {
            scheduler, store, ..
        } = test_scheduler(vec![]).await;

        // The harness registers a "one-shot" stub skill that succeeds with
        // disable_job = true.
        let job = store
            .create_job(
                "oneshot-skill",
                Some("0 * * * *"),
                None,
                Some("one-shot"),
                Some(&serde_json::json!({})),
                0,
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        scheduler.tick().await.unwrap();

        let runs = store.runs_for_job(job.id).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert!(runs[0].thread_id.is_none());
        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert!(!job.enabled);
        assert!(job.last_run_at.is_some());
    }

    #[tokio::test]
    async fn tick_survives_empty_queue() {
        let TestScheduler { scheduler, .. } = test_scheduler(vec![]).await;
        scheduler.tick().await.unwrap();
        scheduler.tick().await.unwrap();
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 200), "short");
        let long = "é".repeat(300);
        let cut = truncate(&long, 200);
        assert!(cut.len() <= 200);
        assert!(long.starts_with(cut));
    }
}
