//! Traffic-based departure alert. Polls the directions API until the
//! computed leave-by time is within the configured lead window, then sends a
//! "Time to leave" notification and switches the job off.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Skill, SkillContext, SkillOutcome};
use crate::directions::{DirectionsProvider, TimeAnchor};
use crate::notify::Notifier;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepartureConfig {
    #[allow(dead_code)]
    #[serde(default = "default_version")]
    version: u32,
    origin: String,
    destination: String,
    /// Target arrival today, "HH:MM" local time.
    arrival_time: String,
    #[serde(default = "default_lead_minutes")]
    lead_minutes: i64,
    #[serde(default = "default_poll_interval_minutes")]
    poll_interval_minutes: u64,
}

fn default_version() -> u32 {
    1
}
fn default_lead_minutes() -> i64 {
    7
}
fn default_poll_interval_minutes() -> u64 {
    5
}

pub struct DepartureCheckSkill {
    directions: Arc<dyn DirectionsProvider>,
    notifier: Arc<dyn Notifier>,
    /// Test hook: freeze the wall clock.
    now_override: Option<DateTime<Local>>,
}

impl DepartureCheckSkill {
    pub fn new(directions: Arc<dyn DirectionsProvider>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            directions,
            notifier,
            now_override: None,
        }
    }

    #[cfg(test)]
    pub fn with_frozen_clock(
        directions: Arc<dyn DirectionsProvider>,
        notifier: Arc<dyn Notifier>,
        now: DateTime<Local>,
    ) -> Self {
        Self {
            directions,
            notifier,
            now_override: Some(now),
        }
    }

    fn now(&self) -> DateTime<Local> {
        self.now_override.unwrap_or_else(Local::now)
    }
}

#[async_trait]
impl Skill for DepartureCheckSkill {
    fn name(&self) -> &str {
        "departure-check"
    }

    fn description(&self) -> &str {
        "Watches traffic ahead of a target arrival time and notifies when it is time to leave"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "version": { "type": "integer", "const": 1 },
                "origin": { "type": "string", "description": "Start address or place" },
                "destination": { "type": "string", "description": "End address or place" },
                "arrivalTime": {
                    "type": "string",
                    "pattern": "^\\d{2}:\\d{2}$",
                    "description": "Target arrival today, HH:MM local time"
                },
                "leadMinutes": {
                    "type": "integer",
                    "description": "Notify when leave-by is within this many minutes (default 7)"
                },
                "pollIntervalMinutes": {
                    "type": "integer",
                    "description": "Minutes between traffic checks (default 5)"
                }
            },
            "required": ["origin", "destination", "arrivalTime"]
        })
    }

    async fn execute(&self, mut ctx: SkillContext) -> anyhow::Result<SkillOutcome> {
        let config: DepartureConfig = serde_json::from_value(ctx.job.config.clone())
            .map_err(|e| anyhow::anyhow!("invalid departure-check config: {}", e))?;

        let arrival_time = NaiveTime::parse_from_str(&config.arrival_time, "%H:%M")
            .map_err(|e| anyhow::anyhow!("invalid arrivalTime '{}': {}", config.arrival_time, e))?;

        loop {
            if ctx.cancelled() {
                return Ok(SkillOutcome::success("Aborted"));
            }

            let now = self.now();
            let arrival = match Local
                .from_local_datetime(&now.date_naive().and_time(arrival_time))
                .earliest()
            {
                Some(arrival) => arrival,
                None => return Ok(SkillOutcome::failure("arrival time does not exist today")),
            };

            if arrival <= now {
                return Ok(SkillOutcome::done("Past arrival time"));
            }

            match self
                .directions
                .route(
                    &config.origin,
                    &config.destination,
                    TimeAnchor::ArriveBy(arrival.with_timezone(&chrono::Utc)),
                )
                .await
            {
                Ok(route) => {
                    let leave_by = arrival - route.effective_duration();
                    let threshold = now + chrono::Duration::minutes(config.lead_minutes);
                    info!(
                        job = %ctx.job.name,
                        leave_by = %leave_by.format("%H:%M"),
                        travel_mins = route.effective_duration().num_minutes(),
                        "Departure check"
                    );

                    if leave_by <= threshold {
                        let body = format!(
                            "Leave by {} to arrive at {} by {} ({} min drive)",
                            leave_by.format("%H:%M"),
                            config.destination,
                            arrival.format("%H:%M"),
                            route.effective_duration().num_minutes()
                        );
                        self.notifier
                            .notify("Time to leave", &body, Some("car"), None)
                            .await;
                        return Ok(SkillOutcome::done(format!(
                            "Notification sent: leave by {}",
                            leave_by.format("%H:%M")
                        )));
                    }
                }
                Err(e) => {
                    // Transient lookup failures must not fail the job.
                    warn!(job = %ctx.job.name, error = %e, "Directions check failed, will retry");
                }
            }

            let sleep = Duration::from_secs(config.poll_interval_minutes * 60);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = ctx.cancel.changed() => {
                    if ctx.cancelled() {
                        return Ok(SkillOutcome::success("Aborted"));
                    }
                }
            }
        }
    }
}
