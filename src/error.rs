// src/error.rs

use thiserror::Error;

use crate::models::FailureKind;

/// Failure taxonomy for one backend round trip. The retry policy keys off
/// `is_transient`, the executor keys off `is_fatal` and `is_connectivity`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("backend returned status {0}")]
    Status(u16),

    #[error("authentication rejected with status {0}")]
    Auth(u16),

    #[error("malformed backend response: {0}")]
    InvalidResponse(String),

    #[error("query rejected by backend: {0}")]
    Query(String),
}

impl SearchError {
    /// Transient failures are worth a bounded re-execute of the whole batch:
    /// timeouts, connection-level failures and 5xx-class statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Timeout | SearchError::Connect(_) => true,
            SearchError::Status(code) => *code >= 500,
            _ => false,
        }
    }

    /// Auth rejections abort the run immediately: no retry will make the
    /// credentials valid and every future batch would fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SearchError::Auth(_))
    }

    /// Connection-level failures feed the connectivity breaker; enough of
    /// them in a row means the backend is down for everyone.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SearchError::Connect(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SearchError::Timeout => FailureKind::Timeout,
            SearchError::Connect(_) => FailureKind::Connection,
            SearchError::Status(_) => FailureKind::BackendRejected,
            SearchError::Auth(_) => FailureKind::AuthRejected,
            SearchError::InvalidResponse(_) => FailureKind::InvalidResponse,
            SearchError::Query(_) => FailureKind::QueryError,
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SearchError::Timeout
        } else if err.is_connect() {
            SearchError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            SearchError::Status(status.as_u16())
        } else {
            SearchError::InvalidResponse(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_5xx_are_transient() {
        assert!(SearchError::Timeout.is_transient());
        assert!(SearchError::Status(503).is_transient());
        assert!(SearchError::Connect("refused".into()).is_transient());
        assert!(!SearchError::Status(400).is_transient());
        assert!(!SearchError::Auth(401).is_transient());
        assert!(!SearchError::Query("bad".into()).is_transient());
    }

    #[test]
    fn only_auth_is_immediately_fatal() {
        assert!(SearchError::Auth(403).is_fatal());
        assert!(!SearchError::Connect("refused".into()).is_fatal());
        assert!(!SearchError::Timeout.is_fatal());
    }

    #[test]
    fn failure_kinds_map_one_to_one() {
        assert_eq!(SearchError::Timeout.failure_kind(), FailureKind::Timeout);
        assert_eq!(
            SearchError::Connect("x".into()).failure_kind(),
            FailureKind::Connection
        );
        assert_eq!(SearchError::Status(502).failure_kind(), FailureKind::BackendRejected);
        assert_eq!(SearchError::Auth(401).failure_kind(), FailureKind::AuthRejected);
    }
}
