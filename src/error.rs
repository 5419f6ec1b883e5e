//! Error types for snapshot and upstream operations.

use std::fmt;
use thiserror::Error;

/// Classification of a single failed upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// HTTP 429 from the upstream API.
    RateLimited,
    /// HTTP 5xx from the upstream API.
    Server(u16),
    /// Connection or transfer failure before a full response arrived.
    Network,
    /// The request or connect timeout elapsed.
    Timeout,
    /// Any other non-success response (4xx except 429).
    Client(u16),
    /// The response body was not valid JSON.
    Decode,
    /// The request could not be built (bad path, bad body).
    Request,
}

impl FailureKind {
    /// Whether a failure of this kind is transient and worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited
                | FailureKind::Server(_)
                | FailureKind::Network
                | FailureKind::Timeout
        )
    }

    /// The HTTP status behind this failure, if a response was received.
    pub fn status(self) -> Option<u16> {
        match self {
            FailureKind::RateLimited => Some(429),
            FailureKind::Server(code) | FailureKind::Client(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate limited (HTTP 429)"),
            FailureKind::Server(code) => write!(f, "server error (HTTP {})", code),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Client(code) => write!(f, "client error (HTTP {})", code),
            FailureKind::Decode => write!(f, "invalid response body"),
            FailureKind::Request => write!(f, "invalid request"),
        }
    }
}

/// One failed upstream attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Terminal outcome of an upstream operation that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Every allowed attempt failed with a transient failure.
    #[error("upstream request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Failure },

    /// A failure that must not be retried.
    #[error("upstream request rejected on attempt {attempts}: {failure}")]
    Rejected { attempts: u32, failure: Failure },
}

impl UpstreamError {
    /// The failure that ended the operation.
    pub fn failure(&self) -> &Failure {
        match self {
            UpstreamError::Exhausted { last, .. } => last,
            UpstreamError::Rejected { failure, .. } => failure,
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            UpstreamError::Exhausted { attempts, .. } | UpstreamError::Rejected { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, UpstreamError::Exhausted { .. })
    }
}

/// Errors returned synchronously to callers of the snapshot operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The snapshot id is unknown, closed, or past its time-to-live.
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// A chunk was requested with a zero limit.
    #[error("invalid chunk limit {0}: must be greater than zero")]
    InvalidLimit(usize),

    /// An upstream call made directly on behalf of the caller failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// HTTP client construction error.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// Missing or malformed upstream configuration.
    #[error("invalid upstream configuration: {0}")]
    Config(String),
}
