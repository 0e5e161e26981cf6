use super::connection::ConnectionState;
use super::error::{InvokeError, InvokeFailure, InvokeResponse};
use super::handler::ChannelHandler;
use super::queue::{forward, Enqueue, MessageQueue};
use crate::app::boundary::{Admission, ChannelValidator};
use crate::app::breaker::{CallOptions, CallOutcome, ErrorBoundary, BACKEND_TARGET};
use crate::domain::boundary::{ChannelCategory, CorrelationId};
use crate::ports::transport::{BackendTransport, TransportRequest};
use crate::telemetry::HostMetrics;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Per-call knobs supplied by the UI. Unset fields take the host defaults.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InvokeOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub fallback: Option<Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// The single entry point for UI calls: validate, then route by channel
/// category to a local handler or, through the error boundary, to the
/// backend.
pub struct InvokeService {
    validator: Arc<ChannelValidator>,
    boundary: Arc<ErrorBoundary>,
    transport: Arc<dyn BackendTransport>,
    queue: Arc<MessageQueue>,
    connection: watch::Receiver<ConnectionState>,
    handlers: HashMap<ChannelCategory, Arc<dyn ChannelHandler>>,
    metrics: Option<Arc<HostMetrics>>,
}

impl InvokeService {
    pub fn new(
        validator: Arc<ChannelValidator>,
        boundary: Arc<ErrorBoundary>,
        transport: Arc<dyn BackendTransport>,
        queue: Arc<MessageQueue>,
        connection: watch::Receiver<ConnectionState>,
        metrics: Option<Arc<HostMetrics>>,
    ) -> Self {
        Self {
            validator,
            boundary,
            transport,
            queue,
            connection,
            handlers: HashMap::new(),
            metrics,
        }
    }

    pub fn with_handler(
        mut self,
        category: ChannelCategory,
        handler: Arc<dyn ChannelHandler>,
    ) -> Self {
        self.handlers.insert(category, handler);
        self
    }

    pub fn validator(&self) -> &Arc<ChannelValidator> {
        &self.validator
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub async fn invoke(
        &self,
        channel: &str,
        payload: Value,
        options: InvokeOptions,
    ) -> Result<InvokeResponse, InvokeFailure> {
        let started = Instant::now();
        let correlation_id = CorrelationId::from_caller(options.correlation_id.as_deref());
        let result = self.dispatch(channel, &payload, options, &correlation_id).await;

        let outcome = match &result {
            Ok((_, false)) => "ok",
            Ok((_, true)) => "fallback",
            Err(err) => err.code(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_invoke_latency(
                started.elapsed().as_secs_f64() * 1000.0,
                channel,
                outcome,
            );
        }
        debug!(%correlation_id, channel, outcome, "invoke finished");

        match result {
            Ok((result, fallback)) => Ok(InvokeResponse {
                correlation_id,
                result,
                fallback,
            }),
            Err(error) => Err(InvokeFailure {
                correlation_id,
                error,
            }),
        }
    }

    async fn dispatch(
        &self,
        channel: &str,
        payload: &Value,
        options: InvokeOptions,
        correlation_id: &CorrelationId,
    ) -> Result<(Value, bool), InvokeError> {
        let admission = self.validator.validate(channel, payload, correlation_id)?;
        let call = self.call_options(options);

        if admission.policy.category == ChannelCategory::Backend {
            return self.call_backend(admission, call, correlation_id).await;
        }

        let Some(handler) = self.handlers.get(&admission.policy.category) else {
            return Err(InvokeError::unknown(format!(
                "no handler for {} channels",
                admission.policy.category.as_str()
            )));
        };
        let handled = tokio::time::timeout(
            call.timeout,
            handler.handle(&admission.channel, admission.payload.value, correlation_id),
        )
        .await;
        match handled {
            Ok(Ok(value)) => Ok((value, false)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(InvokeError::Timeout {
                timeout_ms: call.timeout.as_millis() as u64,
            }),
        }
    }

    async fn call_backend(
        &self,
        admission: Admission,
        call: CallOptions,
        correlation_id: &CorrelationId,
    ) -> Result<(Value, bool), InvokeError> {
        let connected = *self.connection.borrow() == ConnectionState::Connected;
        let channel = admission.channel.as_str().to_string();
        let payload = admission.payload.value;

        let completion = match self.queue.enqueue(
            connected,
            &channel,
            payload.clone(),
            correlation_id.clone(),
            call.clone(),
        ) {
            Enqueue::Bypass => {
                let request = TransportRequest {
                    channel,
                    payload,
                    correlation_id: correlation_id.clone(),
                };
                forward(&self.boundary, &self.transport, request, &call).await
            }
            Enqueue::Queued(rx) => {
                debug!(%correlation_id, channel = %channel, "backend unavailable; call queued");
                if let Some(metrics) = &self.metrics {
                    metrics.record_queued(&channel);
                }
                // Dropping the receiver on timeout abandons the queued call.
                match tokio::time::timeout(call.timeout, rx).await {
                    Ok(Ok(completion)) => completion,
                    Ok(Err(_)) => Err(InvokeError::unknown("queued call was dropped")),
                    Err(_) => Err(InvokeError::Timeout {
                        timeout_ms: call.timeout.as_millis() as u64,
                    }),
                }
            }
            Enqueue::Full => {
                warn!(%correlation_id, channel = %channel, "offline queue full");
                Err(InvokeError::BackendError {
                    status: None,
                    message: "backend unavailable and offline queue full".into(),
                })
            }
            Enqueue::Closed => Err(InvokeError::unknown("host shutting down")),
        };

        match completion {
            Ok(CallOutcome::Value(value)) => Ok((value, false)),
            Ok(CallOutcome::Fallback { value, .. }) => Ok((value, true)),
            Err(err) => self.masked(err, call.fallback, correlation_id),
        }
    }

    /// Failures that never reached the error boundary still honour the
    /// caller's fallback, and are logged and counted the same way.
    fn masked(
        &self,
        err: InvokeError,
        fallback: Option<Value>,
        correlation_id: &CorrelationId,
    ) -> Result<(Value, bool), InvokeError> {
        let Some(value) = fallback else {
            return Err(err);
        };
        warn!(
            %correlation_id,
            error = err.code(),
            %err,
            "backend call failed; returning caller fallback"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_fallback(BACKEND_TARGET, err.code());
        }
        Ok((value, true))
    }

    fn call_options(&self, options: InvokeOptions) -> CallOptions {
        let defaults = self.boundary.retry_config();
        CallOptions {
            timeout: options
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            retries: options.retries.unwrap_or(defaults.default_retries),
            fallback: options.fallback,
        }
    }
}
