//! OpenAI-compatible chat client.
//!
//! `chat_stream` drives a streaming `/chat/completions` call: text deltas go
//! out through a channel as they arrive, and the call resolves with the
//! assembled turn (full text, tool calls, usage). Tool-call fragments are
//! accumulated per stream index until the final frame.

mod error;

pub use error::{ProviderError, ProviderErrorKind};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A tool invocation the LM asked for during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON string, exactly as the LM produced it.
    pub arguments: String,
}

/// One completed LM turn of the tool-call loop.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Streaming chat turn. Text deltas are sent through `delta_tx` in LM
    /// order; the future resolves with the assembled turn once the stream
    /// ends. An `Err` after deltas were sent means the turn died mid-stream.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Value],
        tools: &[Value],
        delta_tx: mpsc::Sender<String>,
    ) -> CoreResult<ChatTurn>;

    /// One-shot non-streaming completion without tools. Used for titling.
    async fn complete(&self, model: &str, messages: &[Value]) -> CoreResult<String>;
}

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

/// HTTPS is required for remote base URLs so the API key never travels in
/// cleartext; plain HTTP is allowed only for localhost LM servers.
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;
    let host = parsed.host_str().unwrap_or("");
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(base_url, "Using unencrypted HTTP for local LM server");
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote LM URLs (base_url: '{}'). Use HTTPS.",
                    base_url
                ))
            }
        }
        scheme => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'",
            scheme, base_url
        )),
    }
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, String> {
        validate_base_url(base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::network(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Value],
        tools: &[Value],
        delta_tx: mpsc::Sender<String>,
    ) -> CoreResult<ChatTurn> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(model, tools = tools.len(), messages = messages.len(), "Streaming LM call");
        let resp = self.send(&body).await?;

        let mut body_stream = resp.bytes_stream();
        let mut buffer = String::new();
        let mut assembly = StreamAssembly::default();

        'outer: while let Some(chunk) = body_stream.next().await {
            let chunk = chunk.map_err(|e| {
                ProviderError::malformed(format!("stream read failed: {}", e))
            })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some((frame, rest)) = split_sse_frame(&buffer) {
                let payload = extract_data_payload(&frame);
                buffer = rest;

                let Some(payload) = payload else { continue };
                if payload.trim() == "[DONE]" {
                    break 'outer;
                }
                let value: Value = serde_json::from_str(payload.trim()).map_err(|e| {
                    ProviderError::malformed(format!("bad stream frame: {}", e))
                })?;
                if let Some(delta) = assembly.absorb(&value) {
                    // A closed receiver means the consumer cancelled; stop
                    // reading so the request is torn down.
                    if delta_tx.send(delta).await.is_err() {
                        break 'outer;
                    }
                }
            }
        }

        Ok(assembly.finish())
    }

    async fn complete(&self, model: &str, messages: &[Value]) -> CoreResult<String> {
        let body = json!({ "model": model, "messages": messages });
        let resp = self.send(&body).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::malformed(format!("bad completion payload: {}", e)))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::malformed("completion missing content"))?;
        Ok(content.to_string())
    }
}

// ---------------------------------------------------------------------------
// Stream assembly
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates streamed deltas into a `ChatTurn`. Tool-call fragments arrive
/// keyed by `index`; id and name land in the first fragment, argument text is
/// appended across the rest.
#[derive(Default)]
struct StreamAssembly {
    content: String,
    tool_calls: Vec<ToolCallBuilder>,
    usage: Option<TokenUsage>,
}

impl StreamAssembly {
    /// Absorb one stream frame; returns the text delta, if any.
    fn absorb(&mut self, frame: &Value) -> Option<String> {
        if let Some(usage) = frame.get("usage").filter(|u| !u.is_null()) {
            self.usage = parse_usage(usage);
        }

        let delta = &frame["choices"][0]["delta"];

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or(0) as usize;
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(ToolCallBuilder::default());
                }
                let builder = &mut self.tool_calls[index];
                if let Some(id) = call["id"].as_str() {
                    builder.id.push_str(id);
                }
                if let Some(name) = call["function"]["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = call["function"]["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        match delta["content"].as_str() {
            Some(text) if !text.is_empty() => {
                self.content.push_str(text);
                Some(text.to_string())
            }
            _ => None,
        }
    }

    fn finish(self) -> ChatTurn {
        ChatTurn {
            content: self.content,
            tool_calls: self
                .tool_calls
                .into_iter()
                .filter(|b| !b.name.is_empty())
                .map(|b| ToolCallRequest {
                    id: b.id,
                    name: b.name,
                    arguments: if b.arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        b.arguments
                    },
                })
                .collect(),
            usage: self.usage,
        }
    }
}

fn parse_usage(usage: &Value) -> Option<TokenUsage> {
    let input = usage.get("prompt_tokens")?.as_u64()?;
    let output = usage.get("completion_tokens")?.as_u64()?;
    let total = usage
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(input + output);
    Some(TokenUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: total,
    })
}

/// Split the first complete SSE frame off the buffer. Frames end at a blank
/// line; both `\n\n` and `\r\n\r\n` delimiters appear in the wild.
fn split_sse_frame(buffer: &str) -> Option<(String, String)> {
    let lf = buffer.find("\n\n").map(|i| (i, 2));
    let crlf = buffer.find("\r\n\r\n").map(|i| (i, 4));
    let (idx, len) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((
        buffer[..idx].to_string(),
        buffer[idx + len..].to_string(),
    ))
}

/// Concatenate the `data:` lines of a frame; comment lines are dropped.
fn extract_data_payload(frame: &str) -> Option<String> {
    let mut payload = String::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !payload.is_empty() {
                payload.push('\n');
            }
            payload.push_str(rest.trim_start());
        }
    }
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_validation() {
        assert!(OpenAiProvider::new("https://api.openai.com/v1", "k").is_ok());
        assert!(OpenAiProvider::new("http://localhost:11434/v1", "k").is_ok());
        assert!(OpenAiProvider::new("http://api.example.com/v1", "k").is_err());
        assert!(OpenAiProvider::new("ftp://example.com", "k").is_err());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider = OpenAiProvider::new("https://api.openai.com/v1/", "k").unwrap();
        assert_eq!(provider.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn sse_frame_split_handles_both_delimiters() {
        let (frame, rest) = split_sse_frame("data: a\n\ndata: b\n\n").unwrap();
        assert_eq!(frame, "data: a");
        assert_eq!(rest, "data: b\n\n");

        let (frame, rest) = split_sse_frame("data: a\r\n\r\nrest").unwrap();
        assert_eq!(frame, "data: a");
        assert_eq!(rest, "rest");

        assert!(split_sse_frame("data: incomplete").is_none());
    }

    #[test]
    fn data_payload_joins_lines_and_skips_comments() {
        let frame = ": keep-alive\ndata: {\"a\":1}\ndata: {\"b\":2}";
        assert_eq!(
            extract_data_payload(frame).unwrap(),
            "{\"a\":1}\n{\"b\":2}"
        );
        assert!(extract_data_payload(": comment only").is_none());
    }

    #[test]
    fn assembly_accumulates_text_and_tool_calls() {
        let mut assembly = StreamAssembly::default();

        let d1 = assembly.absorb(&json!({
            "choices": [{"delta": {"content": "Hel"}}]
        }));
        assert_eq!(d1.as_deref(), Some("Hel"));

        let d2 = assembly.absorb(&json!({
            "choices": [{"delta": {"content": "lo"}}]
        }));
        assert_eq!(d2.as_deref(), Some("lo"));

        assembly.absorb(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "recall", "arguments": "{\"que"}}
            ]}}]
        }));
        assembly.absorb(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "ry\":\"x\"}"}}
            ]}}]
        }));
        assembly.absorb(&json!({
            "choices": [],
            "usage": {"prompt_tokens": 20, "completion_tokens": 7, "total_tokens": 27}
        }));

        let turn = assembly.finish();
        assert_eq!(turn.content, "Hello");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "recall");
        assert_eq!(turn.tool_calls[0].arguments, "{\"query\":\"x\"}");
        assert_eq!(
            turn.usage,
            Some(TokenUsage {
                input_tokens: 20,
                output_tokens: 7,
                total_tokens: 27
            })
        );
    }

    #[test]
    fn empty_arguments_default_to_empty_object() {
        let mut assembly = StreamAssembly::default();
        assembly.absorb(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "current_datetime"}}
            ]}}]
        }));
        let turn = assembly.finish();
        assert_eq!(turn.tool_calls[0].arguments, "{}");
    }
}
