use thiserror::Error;

use super::record::LookupRecord;

/// Result of one issuer invocation for one descriptor.
///
/// Every fault is captured here; nothing escapes the issuer as a panic or an
/// error that could abort sibling requests.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Vec<LookupRecord>),
    Failure(FetchError),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

impl From<Result<Vec<LookupRecord>, FetchError>> for FetchOutcome {
    fn from(result: Result<Vec<LookupRecord>, FetchError>) -> Self {
        match result {
            Ok(records) => FetchOutcome::Success(records),
            Err(e) => FetchOutcome::Failure(e),
        }
    }
}

/// Low-level transport failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Other,
}

/// Why a single lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("issuer panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, connection failures, throttling (408/429) and server errors
    /// are transient. Other 4xx statuses, redirects and malformed payloads
    /// are treated as permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Panicked(_) => true,
            FetchError::Status(code) => matches!(code, 408 | 429 | 500..=599),
            FetchError::Payload(_) => false,
        }
    }

    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        FetchError::Transport {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(FetchError::transport(TransportKind::Timeout, "timed out").is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Panicked("boom".into()).is_retryable());
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Status(302).is_retryable());
        assert!(!FetchError::Payload("missing documents".into()).is_retryable());
    }

    #[test]
    fn outcome_from_result() {
        let ok: FetchOutcome = Ok(vec![]).into();
        assert!(ok.is_success());
        let err: FetchOutcome = Err(FetchError::Status(500)).into();
        assert!(!err.is_success());
    }
}
