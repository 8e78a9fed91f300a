use std::io::Cursor;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Tool;

const MAX_CHARS: usize = 20_000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Reject URLs that would let the LM reach internal infrastructure.
fn validate_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid URL: {}", e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(format!("blocked scheme '{}': only http/https allowed", scheme)),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL must have a host".to_string())?;
    let host_lower = host.to_lowercase();

    const BLOCKED_HOSTS: &[&str] = &[
        "localhost",
        "127.0.0.1",
        "::1",
        "[::1]",
        "0.0.0.0",
        "169.254.169.254",
        "metadata.google.internal",
    ];
    if BLOCKED_HOSTS.contains(&host_lower.as_str()) {
        return Err(format!("blocked host: {}", host));
    }
    if host_lower.ends_with(".internal")
        || host_lower.ends_with(".local")
        || host_lower.ends_with(".localhost")
    {
        return Err(format!("blocked internal hostname: {}", host));
    }

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(format!("blocked IP address: {}", ip));
        }
    }

    Ok(())
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // CGNAT: 100.64.0.0/10
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_blocked_ip(IpAddr::V4(v4));
            }
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // link-local fe80::/10, unique-local fc00::/7
                || (segments[0] & 0xffc0) == 0xfe80
                || (segments[0] & 0xfe00) == 0xfc00
        }
    }
}

fn is_text_content_type(content_type: &str) -> bool {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    content_type.starts_with("text/")
        || matches!(
            content_type.as_str(),
            "application/xhtml+xml" | "application/xml" | "application/json"
        )
}

pub struct FetchUrlTool {
    client: Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::custom(|attempt| {
                // Re-validate every redirect hop.
                let url = attempt.url().to_string();
                if validate_url(&url).is_err() || attempt.previous().len() >= 10 {
                    attempt.stop()
                } else {
                    attempt.follow()
                }
            }))
            .user_agent("minder/0.4 (+self-hosted assistant)")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a web page and extract its readable content as markdown"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "fetch_url",
            "description": "Fetch a web page and extract its readable article content as markdown. \
                Strips navigation and ads. Long pages are truncated.",
            "parameters": {
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The http(s) URL to fetch"
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }
        })
    }

    // Failures are part of the contract: every path returns a human message.
    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: FetchArgs = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => return Ok(format!("Could not parse fetch_url arguments: {}", e)),
        };

        if let Err(reason) = validate_url(&args.url) {
            return Ok(format!("Request blocked: {}", reason));
        }

        let resp = match self.client.get(&args.url).send().await {
            Ok(resp) => resp,
            Err(e) => return Ok(format!("Error fetching {}: {}", args.url, e)),
        };

        if !resp.status().is_success() {
            return Ok(format!("Error fetching {}: HTTP {}", args.url, resp.status()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        if !is_text_content_type(&content_type) {
            return Ok(format!(
                "Refusing to fetch {}: content type '{}' is not text",
                args.url, content_type
            ));
        }

        let html = match resp.text().await {
            Ok(text) => text,
            Err(e) => return Ok(format!("Error reading body of {}: {}", args.url, e)),
        };

        let parsed_url = reqwest::Url::parse(&args.url)
            .unwrap_or_else(|_| reqwest::Url::parse("http://example.com").unwrap());
        let text = {
            let mut cursor = Cursor::new(html.as_bytes());
            match llm_readability::extractor::extract(&mut cursor, &parsed_url) {
                Ok(product) if !product.text.trim().is_empty() => product.text,
                _ => htmd::convert(&html).unwrap_or_else(|_| html.clone()),
            }
        };

        let mut result = format!("Content from {}:\n\n", args.url);
        if text.len() > MAX_CHARS {
            let mut end = MAX_CHARS;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            result.push_str(&text[..end]);
            result.push_str("\n\n[Truncated]");
        } else {
            result.push_str(&text);
        }
        Ok(result)
    }
}
