//! Classified LM-provider error: tells the caller *why* the call failed.

use std::fmt;

use crate::error::CoreError;

#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 429 — rate limited.
    RateLimit,
    /// 404 or "model not found".
    NotFound,
    /// Request timeout or provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset.
    Network,
    /// 5xx — provider-side outage.
    ServerError,
    /// Anything else, including malformed payloads.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500..=599 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unknown,
            status: None,
            message: detail.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "LM provider error ({}, {:?}): {}", status, self.kind, self.message),
            None => write!(f, "LM provider error ({:?}): {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        CoreError::Upstream(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() > 300 {
        let mut end = 300;
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            ProviderError::from_status(401, "").kind,
            ProviderErrorKind::Auth
        );
        assert_eq!(
            ProviderError::from_status(429, "").kind,
            ProviderErrorKind::RateLimit
        );
        assert_eq!(
            ProviderError::from_status(503, "").kind,
            ProviderErrorKind::ServerError
        );
        assert_eq!(
            ProviderError::from_status(418, "").kind,
            ProviderErrorKind::Unknown
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let err = ProviderError::from_status(500, &"x".repeat(1000));
        assert!(err.message.len() < 320);
        assert!(err.message.ends_with("..."));
    }

    #[test]
    fn converts_to_upstream() {
        let core: CoreError = ProviderError::from_status(500, "oops").into();
        assert!(matches!(core, CoreError::Upstream(_)));
    }
}
