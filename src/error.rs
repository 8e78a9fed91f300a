//! Error kinds shared across the core.
//!
//! Five kinds cover every failure the core can surface. The policy is:
//! recover locally when the failure is advisory (titling, notifications,
//! memory recall during prompt assembly), surface otherwise.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input: bad cron, missing message, unknown skill name.
    /// No state change has happened.
    #[error("{0}")]
    Validation(String),

    /// Referent missing or soft-deleted.
    #[error("{0}")]
    NotFound(String),

    /// Non-2xx or malformed response from a remote collaborator
    /// (LM, embeddings, directions, push).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Database failure. No retries at this layer.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Programmer error: an invariant the code relies on was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl std::fmt::Display, id: i64) -> Self {
        Self::NotFound(format!("{} {} not found", what, id))
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_referent() {
        let e = CoreError::not_found("thread", 42);
        assert_eq!(e.to_string(), "thread 42 not found");
    }

    #[test]
    fn storage_wraps_sqlx() {
        let e: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(e, CoreError::Storage(_)));
    }
}
