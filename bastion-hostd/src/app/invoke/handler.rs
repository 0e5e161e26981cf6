use super::connection::ConnectionState;
use super::error::InvokeError;
use crate::app::breaker::BreakerRegistry;
use crate::app::session::SessionService;
use crate::app::terminal::TerminalSessions;
use crate::domain::boundary::{ChannelName, CorrelationId};
use crate::domain::supervisor::BackendProcessRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;

/// Serves admitted calls that never leave the host process.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    async fn handle(
        &self,
        channel: &ChannelName,
        payload: Value,
        correlation_id: &CorrelationId,
    ) -> Result<Value, InvokeError>;
}

#[async_trait]
impl ChannelHandler for TerminalSessions {
    async fn handle(
        &self,
        channel: &ChannelName,
        payload: Value,
        _correlation_id: &CorrelationId,
    ) -> Result<Value, InvokeError> {
        TerminalSessions::handle(self, channel.as_str(), payload)
            .await
            .map_err(InvokeError::from)
    }
}

#[async_trait]
impl ChannelHandler for SessionService {
    async fn handle(
        &self,
        channel: &ChannelName,
        payload: Value,
        _correlation_id: &CorrelationId,
    ) -> Result<Value, InvokeError> {
        SessionService::handle(self, channel.as_str(), payload)
            .await
            .map_err(InvokeError::from)
    }
}

/// `system:*` channels: liveness and a status summary for the UI.
pub struct SystemHandler {
    backend: watch::Receiver<BackendProcessRecord>,
    connection: watch::Receiver<ConnectionState>,
    breakers: Arc<BreakerRegistry>,
    started_at: DateTime<Utc>,
}

impl SystemHandler {
    pub fn new(
        backend: watch::Receiver<BackendProcessRecord>,
        connection: watch::Receiver<ConnectionState>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            backend,
            connection,
            breakers,
            started_at: Utc::now(),
        }
    }

    pub fn status(&self) -> Value {
        let backend = self.backend.borrow().clone();
        let connection = *self.connection.borrow();
        json!({
            "backend": backend,
            "connection": connection,
            "breakers": self.breakers.snapshots(),
            "started_at": self.started_at,
            "uptime_ms": (Utc::now() - self.started_at).num_milliseconds().max(0),
        })
    }
}

#[async_trait]
impl ChannelHandler for SystemHandler {
    async fn handle(
        &self,
        channel: &ChannelName,
        _payload: Value,
        correlation_id: &CorrelationId,
    ) -> Result<Value, InvokeError> {
        match channel.as_str() {
            "system:ping" => Ok(json!({
                "pong": true,
                "at": Utc::now(),
                "correlation_id": correlation_id,
            })),
            "system:status" => Ok(self.status()),
            other => Err(InvokeError::unknown(format!("no handler for {other}"))),
        }
    }
}
