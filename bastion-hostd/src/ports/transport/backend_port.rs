use crate::domain::boundary::CorrelationId;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub channel: String,
    pub payload: Value,
    pub correlation_id: CorrelationId,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Connection level and server side failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Unavailable(_) => true,
            TransportError::Remote { status, .. } => *status >= 500,
            TransportError::Protocol(_) => false,
        }
    }

    /// Whether the failure says something about backend health. Requests the
    /// backend rejected as invalid do not count against the breaker.
    pub fn trips_breaker(&self) -> bool {
        !matches!(self, TransportError::Remote { status, .. } if *status < 500)
    }
}

#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn call(&self, request: TransportRequest) -> Result<Value, TransportError>;
}
