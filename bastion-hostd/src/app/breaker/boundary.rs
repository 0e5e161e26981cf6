use super::registry::BreakerRegistry;
use crate::domain::breaker::Permit;
use crate::ports::transport::TransportError;
use crate::telemetry::HostMetrics;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomised in either direction.
    pub jitter: f64,
    /// Applied when a call does not specify its own.
    pub default_retries: u32,
    /// Per-attempt timeout applied when a call does not specify its own.
    pub default_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
            default_retries: 2,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(32) as i32);
        let base = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 + jitter * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_secs_f64((base * factor).clamp(0.0, self.max_delay.as_secs_f64()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error("circuit open for {target}")]
    CircuitOpen {
        target: String,
        retry_after: Duration,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Timeout(_) => true,
            CallError::Transport(err) => err.is_retryable(),
            CallError::CircuitOpen { .. } | CallError::Aborted(_) => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CallError::Timeout(_) => "TIMEOUT",
            CallError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            CallError::Transport(_) => "BACKEND_ERROR",
            CallError::Aborted(_) => "UNKNOWN",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CallOptions {
    pub timeout: Duration,
    pub retries: u32,
    pub fallback: Option<Value>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 0,
            fallback: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    Value(Value),
    /// The call failed and the caller's fallback was returned instead.
    Fallback { value: Value, masked: CallError },
}

/// Wraps outbound calls with a per-target breaker, a timeout, retries and an
/// optional fallback.
pub struct ErrorBoundary {
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    metrics: Option<Arc<HostMetrics>>,
}

impl ErrorBoundary {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        retry: RetryConfig,
        metrics: Option<Arc<HostMetrics>>,
    ) -> Self {
        Self {
            breakers,
            retry,
            metrics,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub async fn execute<F, Fut>(
        &self,
        target: &str,
        options: &CallOptions,
        op: F,
    ) -> Result<CallOutcome, CallError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
    {
        let mut attempt = 0u32;
        let failure = loop {
            match self.attempt(target, options.timeout, &op).await {
                Ok(value) => return Ok(CallOutcome::Value(value)),
                Err(err) if attempt < options.retries && err.is_retryable() => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    debug!(
                        target_name = target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "retrying call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => break err,
            }
        };

        match &options.fallback {
            Some(value) => {
                warn!(
                    target_name = target,
                    error = failure.code(),
                    %failure,
                    "call failed; returning caller fallback"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_fallback(target, failure.code());
                }
                Ok(CallOutcome::Fallback {
                    value: value.clone(),
                    masked: failure,
                })
            }
            None => Err(failure),
        }
    }

    async fn attempt<F, Fut>(
        &self,
        target: &str,
        timeout: Duration,
        op: &F,
    ) -> Result<Value, CallError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
    {
        let trial = match self.breakers.acquire(target) {
            Permit::Granted { trial } => trial,
            Permit::Rejected { retry_after } => {
                return Err(CallError::CircuitOpen {
                    target: target.to_string(),
                    retry_after,
                })
            }
        };

        // The operation runs on its own task: a timeout only stops our wait
        // and whatever it returns later is dropped.
        let handle = tokio::spawn(op());
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(value))) => {
                self.breakers.record_success(target, trial);
                Ok(value)
            }
            Ok(Ok(Err(err))) => {
                if err.trips_breaker() {
                    self.breakers.record_failure(target, trial);
                } else {
                    self.breakers.record_success(target, trial);
                }
                Err(CallError::Transport(err))
            }
            Ok(Err(join_err)) => {
                self.breakers.record_failure(target, trial);
                Err(CallError::Aborted(join_err.to_string()))
            }
            Err(_) => {
                self.breakers.record_failure(target, trial);
                Err(CallError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::breaker::{BreakerConfig, BreakerState};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn boundary(threshold: u32) -> ErrorBoundary {
        let breakers = Arc::new(BreakerRegistry::new(
            BreakerConfig {
                failure_threshold: threshold,
                failure_window: Duration::from_secs(60),
                reset_timeout: Duration::from_secs(30),
            },
            None,
        ));
        ErrorBoundary::new(
            breakers,
            RetryConfig {
                jitter: 0.0,
                ..RetryConfig::default()
            },
            Some(Arc::new(crate::telemetry::test_metrics())),
        )
    }

    type BoxedCall = std::pin::Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send>>;

    fn failing(calls: Arc<AtomicUsize>) -> impl Fn() -> BoxedCall {
        move || -> BoxedCall {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Unavailable("refused".into()))
            })
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(3), Duration::from_millis(800));
        assert_eq!(retry.delay_for(20), Duration::from_secs(5));
        let jittered = RetryConfig::default().delay_for(1);
        assert!(jittered >= Duration::from_millis(160) && jittered <= Duration::from_millis(240));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits_without_calling() {
        let boundary = boundary(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let options = CallOptions::default();
        for _ in 0..5 {
            let err = boundary
                .execute("backend", &options, failing(calls.clone()))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "BACKEND_ERROR");
        }
        assert_eq!(boundary.breakers().state("backend"), BreakerState::Open);

        let err = boundary
            .execute("backend", &options, failing(calls.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // After the reset timeout the next call is the half-open trial.
        tokio::time::advance(Duration::from_secs(30)).await;
        let outcome = boundary
            .execute("backend", &options, || async { Ok(json!("up")) })
            .await
            .unwrap();
        assert_eq!(outcome, CallOutcome::Value(json!("up")));
        assert_eq!(boundary.breakers().state("backend"), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let boundary = boundary(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let options = CallOptions {
            retries: 3,
            ..CallOptions::default()
        };
        let counter = calls.clone();
        let outcome = boundary
            .execute("backend", &options, move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TransportError::Unavailable("refused".into()))
                    } else {
                        Ok(json!(42))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome, CallOutcome::Value(json!(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_fast() {
        let boundary = boundary(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let options = CallOptions {
            retries: 5,
            ..CallOptions::default()
        };
        let err = boundary
            .execute("backend", &options, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Remote {
                        status: 400,
                        message: "bad input".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(boundary.breakers().state("backend"), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_operation_running() {
        let boundary = boundary(10);
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();
        let options = CallOptions {
            timeout: Duration::from_secs(1),
            ..CallOptions::default()
        };
        let err = boundary
            .execute("backend", &options, move || {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    flag.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("late"))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err, CallError::Timeout(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_masks_failure() {
        let boundary = boundary(10);
        let options = CallOptions {
            fallback: Some(json!({"cached": true})),
            ..CallOptions::default()
        };
        let outcome = boundary
            .execute("backend", &options, failing(Arc::new(AtomicUsize::new(0))))
            .await
            .unwrap();
        match outcome {
            CallOutcome::Fallback { value, masked } => {
                assert_eq!(value, json!({"cached": true}));
                assert_eq!(masked.code(), "BACKEND_ERROR");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }
}
