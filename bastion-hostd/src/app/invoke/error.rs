use crate::app::boundary::BoundaryRejection;
use crate::app::breaker::CallError;
use crate::app::session::SessionError;
use crate::app::terminal::TerminalError;
use crate::domain::boundary::CorrelationId;
use crate::ports::transport::TransportError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Every way a boundary call can fail, tagged by `code` on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvokeError {
    #[error("call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("channel rejected: {reason}")]
    ChannelRejected { reason: String },
    #[error("rate limited; retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    SizeExceeded { size: usize, limit: usize },
    #[error("circuit open for {target}; retry after {retry_after_ms} ms")]
    CircuitOpen { target: String, retry_after_ms: u64 },
    #[error("backend error: {message}")]
    BackendError { status: Option<u16>, message: String },
    #[error("{message}")]
    Unknown { message: String },
}

impl InvokeError {
    pub fn code(&self) -> &'static str {
        match self {
            InvokeError::Timeout { .. } => "TIMEOUT",
            InvokeError::ChannelRejected { .. } => "CHANNEL_REJECTED",
            InvokeError::RateLimited { .. } => "RATE_LIMITED",
            InvokeError::SizeExceeded { .. } => "SIZE_EXCEEDED",
            InvokeError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            InvokeError::BackendError { .. } => "BACKEND_ERROR",
            InvokeError::Unknown { .. } => "UNKNOWN",
        }
    }

    pub(crate) fn unknown(message: impl Into<String>) -> Self {
        InvokeError::Unknown {
            message: message.into(),
        }
    }

    fn backend(message: impl Into<String>) -> Self {
        InvokeError::BackendError {
            status: None,
            message: message.into(),
        }
    }
}

impl From<BoundaryRejection> for InvokeError {
    fn from(rejection: BoundaryRejection) -> Self {
        match rejection {
            BoundaryRejection::Rejected { reason } => InvokeError::ChannelRejected { reason },
            BoundaryRejection::RateLimited { retry_after } => InvokeError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
            },
            BoundaryRejection::SizeExceeded { size, limit } => {
                InvokeError::SizeExceeded { size, limit }
            }
        }
    }
}

impl From<CallError> for InvokeError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Timeout(timeout) => InvokeError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            CallError::CircuitOpen {
                target,
                retry_after,
            } => InvokeError::CircuitOpen {
                target,
                retry_after_ms: retry_after.as_millis() as u64,
            },
            CallError::Transport(TransportError::Remote { status, message }) => {
                InvokeError::BackendError {
                    status: Some(status),
                    message,
                }
            }
            CallError::Transport(other) => InvokeError::backend(other.to_string()),
            CallError::Aborted(message) => InvokeError::Unknown { message },
        }
    }
}

// Local handler failures say nothing about backend health, so they never
// surface as BACKEND_ERROR.
impl From<TerminalError> for InvokeError {
    fn from(err: TerminalError) -> Self {
        InvokeError::unknown(err.to_string())
    }
}

impl From<SessionError> for InvokeError {
    fn from(err: SessionError) -> Self {
        InvokeError::unknown(err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvokeResponse {
    pub correlation_id: CorrelationId,
    pub result: Value,
    /// Set when `result` is the caller's fallback rather than a real answer.
    pub fallback: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[error("{error} (correlation {correlation_id})")]
pub struct InvokeFailure {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub error: InvokeError,
}
