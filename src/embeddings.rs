//! Remote embedding client: text in, fixed-dimension vector out. No caching.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

pub struct RemoteEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str, dimensions: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": text });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::upstream(format!("embedding request failed: {}", e)))?;

        let status = resp.status();
        let text_body = resp
            .text()
            .await
            .map_err(|e| CoreError::upstream(format!("embedding response read failed: {}", e)))?;

        if !status.is_success() {
            let mut end = text_body.len().min(300);
            while end > 0 && !text_body.is_char_boundary(end) {
                end -= 1;
            }
            return Err(CoreError::upstream(format!(
                "embedding API returned {}: {}",
                status, &text_body[..end]
            )));
        }

        let data: Value = serde_json::from_str(&text_body)
            .map_err(|e| CoreError::upstream(format!("malformed embedding payload: {}", e)))?;

        let vector: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| CoreError::upstream("embedding payload missing data[0].embedding"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != self.dimensions {
            return Err(CoreError::upstream(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }

        debug!(model = %self.model, chars = text.len(), "Embedded text");
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
