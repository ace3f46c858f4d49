//! Lifecycle error types
//!
//! Two layers of errors flow through the controller:
//!
//! - [`ApiError`] is what the transport layer returns. It carries an explicit
//!   [`ApiErrorKind`] so the controller never has to inspect message text to
//!   decide whether a failure is a timeout or an unknown job.
//! - [`LifecycleError`] is the taxonomy surfaced to the caller. Every variant
//!   renders as a reason a person can act on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for controller operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Structured classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// Connection refused, reset, DNS failure and similar.
    Network,
    /// The request did not complete within the client timeout.
    Timeout,
    /// The server does not know the job (HTTP 404).
    NotFound,
    /// The job exists but has not finished (HTTP 400 on result fetch).
    NotReady,
    /// The job finished without producing a result (HTTP 500 on result fetch).
    NoResult,
    /// Any other non-success HTTP status.
    Server(u16),
    /// The response body could not be decoded.
    Protocol,
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::NotFound => write!(f, "not_found"),
            Self::NotReady => write!(f, "not_ready"),
            Self::NoResult => write!(f, "no_result"),
            Self::Server(status) => write!(f, "server_{}", status),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}

/// A classified transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Protocol, message)
    }

    /// Whether the server reported the job as unknown.
    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    /// Whether the failure was a client-side timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == ApiErrorKind::Timeout
    }
}

/// Errors surfaced by the job lifecycle controller.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// `start` was called without a device or media handle.
    #[error("Select a device and upload a media file before starting ({missing} is missing)")]
    Precondition { missing: &'static str },

    /// The start request was rejected or never reached the server.
    #[error("Could not start the analysis: {0}")]
    StartFailed(ApiError),

    /// A status poll failed; counted against the error budget.
    #[error("Network is unstable, retrying automatically: {0}")]
    TransientNetwork(ApiError),

    /// A status poll timed out; counted against the enlarged error budget.
    #[error("Server is slow to respond, retrying automatically: {0}")]
    TimeoutClassified(ApiError),

    /// The server no longer knows the job, usually because it restarted.
    #[error("The server restarted and the analysis data for job {job_id} was lost. Start the analysis again")]
    JobNotFound { job_id: String },

    /// Every health probe in the budget reported the server dead.
    #[error("Lost connection to the server after {probes} failed health checks. Check the service and start again")]
    ServerUnreachable { probes: u32 },

    /// The wall-clock ceiling for one session was exceeded.
    #[error("No result after {minutes} minutes of polling. Start the analysis again")]
    SessionTimeout { minutes: u64 },

    /// The job completed but its result could not be fetched.
    #[error("The analysis finished but its result could not be loaded: {0}")]
    ResultUnavailable(ApiError),

    /// The server reported the job itself as failed.
    #[error("The analysis failed on the server: {reason}")]
    JobFailed { reason: String },

    /// `reset` (or a newer `start`) replaced the session while it was starting.
    #[error("The session was reset before the job started")]
    Superseded,
}

impl LifecycleError {
    /// Classify a failed status poll. Unknown jobs short-circuit; timeouts
    /// get their own class so the caller can apply the larger budget.
    pub fn from_poll_failure(err: ApiError, job_id: &str) -> Self {
        match err.kind {
            ApiErrorKind::NotFound => Self::JobNotFound {
                job_id: job_id.to_string(),
            },
            ApiErrorKind::Timeout => Self::TimeoutClassified(err),
            _ => Self::TransientNetwork(err),
        }
    }

    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Precondition { .. } => "PRECONDITION",
            Self::StartFailed(_) => "START_FAILED",
            Self::TransientNetwork(_) => "TRANSIENT_NETWORK",
            Self::TimeoutClassified(_) => "TIMEOUT_CLASSIFIED",
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::ServerUnreachable { .. } => "SERVER_UNREACHABLE",
            Self::SessionTimeout { .. } => "SESSION_TIMEOUT",
            Self::ResultUnavailable(_) => "RESULT_UNAVAILABLE",
            Self::JobFailed { .. } => "JOB_FAILED",
            Self::Superseded => "SUPERSEDED",
        }
    }

    /// Whether this error ends the session.
    ///
    /// Transient and timeout-classified poll failures are retried; the
    /// precondition error never creates a session in the first place.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Precondition { .. } | Self::TransientNetwork(_) | Self::TimeoutClassified(_)
        )
    }
}
