use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Tool;
use crate::directions::{DirectionsProvider, TimeAnchor};

pub struct DirectionsTool {
    provider: Arc<dyn DirectionsProvider>,
}

impl DirectionsTool {
    pub fn new(provider: Arc<dyn DirectionsProvider>) -> Self {
        Self { provider }
    }
}

#[derive(Deserialize)]
struct DirectionsArgs {
    origin: String,
    destination: String,
    departure_time: Option<String>,
    arrival_time: Option<String>,
}

fn parse_instant(raw: &str, field: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("{} must be ISO-8601 ('{}': {})", field, raw, e))
}

fn format_minutes(duration: chrono::Duration) -> String {
    let mins = (duration.num_seconds() as f64 / 60.0).round() as i64;
    format!("{} min", mins.max(1))
}

#[async_trait]
impl Tool for DirectionsTool {
    fn name(&self) -> &str {
        "directions"
    }

    fn description(&self) -> &str {
        "Get driving directions and travel time between two places"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "directions",
            "description": "Get driving directions and travel time between two places, with live \
                traffic. Set arrival_time to learn when to leave; set departure_time for a future \
                departure; set neither to leave now. Never set both.",
            "parameters": {
                "type": "object",
                "properties": {
                    "origin": { "type": "string", "description": "Start address or place" },
                    "destination": { "type": "string", "description": "End address or place" },
                    "departure_time": {
                        "type": "string",
                        "description": "ISO-8601 departure instant (optional)"
                    },
                    "arrival_time": {
                        "type": "string",
                        "description": "ISO-8601 desired arrival instant (optional)"
                    }
                },
                "required": ["origin", "destination"],
                "additionalProperties": false
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: DirectionsArgs = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => return Ok(format!("Could not parse directions arguments: {}", e)),
        };

        let anchor = match (&args.departure_time, &args.arrival_time) {
            (Some(_), Some(_)) => {
                return Ok(
                    "Set either departure_time or arrival_time, not both.".to_string(),
                )
            }
            (Some(raw), None) => match parse_instant(raw, "departure_time") {
                Ok(at) => TimeAnchor::DepartAt(at),
                Err(msg) => return Ok(msg),
            },
            (None, Some(raw)) => match parse_instant(raw, "arrival_time") {
                Ok(at) => TimeAnchor::ArriveBy(at),
                Err(msg) => return Ok(msg),
            },
            (None, None) => TimeAnchor::Now,
        };

        let route = match self
            .provider
            .route(&args.origin, &args.destination, anchor)
            .await
        {
            Ok(route) => route,
            Err(e) => return Ok(format!("Directions lookup failed: {}", e)),
        };

        let mut output = format!(
            "Route from {} to {}:\n",
            args.origin, args.destination
        );
        if !route.summary.is_empty() {
            output.push_str(&format!("Via: {}\n", route.summary));
        }
        output.push_str(&format!(
            "Distance: {:.1} km\n",
            route.distance_meters as f64 / 1000.0
        ));
        output.push_str(&format!("Duration: {}", format_minutes(route.duration)));
        if let Some(traffic) = route.duration_in_traffic {
            output.push_str(&format!(" ({} with current traffic)", format_minutes(traffic)));
        }
        output.push('\n');

        if let TimeAnchor::ArriveBy(arrival) = anchor {
            let leave_by = arrival - route.effective_duration();
            output.push_str(&format!(
                "Leave by: {}\n",
                leave_by.with_timezone(&Local).format("%H:%M")
            ));
        }
        Ok(output)
    }
}
