//! Directions API client. Returns route duration (with live traffic when the
//! provider supplies it) between two places, optionally anchored to a
//! departure or arrival time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAnchor {
    Now,
    DepartAt(DateTime<Utc>),
    ArriveBy(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct Route {
    pub summary: String,
    pub distance_meters: i64,
    pub duration: chrono::Duration,
    /// Present when the provider reports live traffic.
    pub duration_in_traffic: Option<chrono::Duration>,
}

impl Route {
    /// Traffic-aware duration when available, nominal otherwise.
    pub fn effective_duration(&self) -> chrono::Duration {
        self.duration_in_traffic.unwrap_or(self.duration)
    }
}

#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn route(&self, origin: &str, destination: &str, anchor: TimeAnchor)
        -> CoreResult<Route>;
}

pub struct DirectionsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl DirectionsClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl DirectionsProvider for DirectionsClient {
    async fn route(
        &self,
        origin: &str,
        destination: &str,
        anchor: TimeAnchor,
    ) -> CoreResult<Route> {
        let mut query: Vec<(&str, String)> = vec![
            ("origin", origin.to_string()),
            ("destination", destination.to_string()),
            ("key", self.api_key.clone()),
        ];
        match anchor {
            TimeAnchor::Now => query.push(("departure_time", "now".to_string())),
            TimeAnchor::DepartAt(at) => {
                query.push(("departure_time", at.timestamp().to_string()))
            }
            TimeAnchor::ArriveBy(at) => query.push(("arrival_time", at.timestamp().to_string())),
        }

        let resp = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| CoreError::upstream(format!("directions request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::upstream(format!(
                "directions API returned {}",
                status
            )));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| CoreError::upstream(format!("malformed directions payload: {}", e)))?;

        let api_status = data["status"].as_str().unwrap_or("UNKNOWN");
        if api_status != "OK" {
            return Err(CoreError::upstream(format!(
                "directions API status {}: {}",
                api_status,
                data["error_message"].as_str().unwrap_or("")
            )));
        }

        let leg = &data["routes"][0]["legs"][0];
        let duration_secs = leg["duration"]["value"]
            .as_i64()
            .ok_or_else(|| CoreError::upstream("directions payload missing duration"))?;
        let traffic_secs = leg["duration_in_traffic"]["value"].as_i64();

        Ok(Route {
            summary: data["routes"][0]["summary"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            distance_meters: leg["distance"]["value"].as_i64().unwrap_or(0),
            duration: chrono::Duration::seconds(duration_secs),
            duration_in_traffic: traffic_secs.map(chrono::Duration::seconds),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_duration_prefers_traffic() {
        let route = Route {
            summary: "I-90".to_string(),
            distance_meters: 10_000,
            duration: chrono::Duration::seconds(1200),
            duration_in_traffic: Some(chrono::Duration::seconds(1500)),
        };
        assert_eq!(route.effective_duration().num_seconds(), 1500);

        let no_traffic = Route {
            duration_in_traffic: None,
            ..route
        };
        assert_eq!(no_traffic.effective_duration().num_seconds(), 1200);
    }
}
