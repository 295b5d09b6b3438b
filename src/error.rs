//! Typed error kinds for the call core.
//!
//! Transport-layer retries stay local to the client that issued the request;
//! anything that leaves a call unable to make forward progress is converted
//! into a terminal transition by the controller. Callee-audible failures are
//! expressed only through call audio, never raw error text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Connection resets, DNS failures, dropped sockets. Retryable.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The provider understood the request and said no. Not retryable.
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    /// Bad or expired credentials. Terminate and alarm.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Provider-side quota exhausted. Terminate and alarm.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Send-rate pressure absorbed by the governor. Never surfaces to a call.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// A bounded wait elapsed. Retryable up to the caller's budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Programmer error. Logged and fatal to the call, never to the process.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl CoreError {
    /// Whether the issuing client may retry the operation locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientNetwork(_) | CoreError::Timeout(_))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return CoreError::Timeout(e.to_string());
        }
        if let Some(status) = e.status() {
            return match status.as_u16() {
                401 | 403 => CoreError::Unauthorized(e.to_string()),
                429 => CoreError::QuotaExceeded(e.to_string()),
                s if s >= 500 => CoreError::TransientNetwork(e.to_string()),
                _ => CoreError::ProviderRejected(e.to_string()),
            };
        }
        CoreError::TransientNetwork(e.to_string())
    }
}

/// Classify an HTTP status from a provider response body path.
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> CoreError {
    match status.as_u16() {
        401 | 403 => CoreError::Unauthorized(body.to_string()),
        408 => CoreError::Timeout(body.to_string()),
        429 => CoreError::QuotaExceeded(body.to_string()),
        s if s >= 500 => CoreError::TransientNetwork(format!("{}: {}", s, body)),
        s => CoreError::ProviderRejected(format!("{}: {}", s, body)),
    }
}
