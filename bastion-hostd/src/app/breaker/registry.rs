use crate::domain::breaker::{
    BreakerConfig, BreakerSnapshot, BreakerState, BreakerTransition, CircuitBreaker, Permit,
};
use crate::telemetry::HostMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Lazily created breakers keyed by logical target.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    config: BreakerConfig,
    metrics: Option<Arc<HostMetrics>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, metrics: Option<Arc<HostMetrics>>) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
            metrics,
        }
    }

    pub fn acquire(&self, target: &str) -> Permit {
        self.with_breaker(target, |breaker, now| breaker.try_acquire(now))
    }

    pub fn record_success(&self, target: &str, trial: bool) {
        self.with_breaker(target, |breaker, now| breaker.record_success(now, trial));
    }

    pub fn record_failure(&self, target: &str, trial: bool) {
        self.with_breaker(target, |breaker, now| breaker.record_failure(now, trial));
    }

    pub fn abandon_trial(&self, target: &str) {
        self.with_breaker(target, |breaker, _| breaker.abandon_trial());
    }

    pub fn reset(&self, target: &str, reason: &'static str) {
        self.with_breaker(target, |breaker, _| breaker.reset(reason));
    }

    pub fn trip(&self, target: &str, reason: &'static str) {
        self.with_breaker(target, |breaker, now| breaker.trip(now, reason));
    }

    pub fn state(&self, target: &str) -> BreakerState {
        self.breakers
            .lock()
            .get(target)
            .map(CircuitBreaker::state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut out: Vec<BreakerSnapshot> = self
            .breakers
            .lock()
            .values()
            .map(|breaker| breaker.snapshot(now))
            .collect();
        out.sort_by(|a, b| a.target.cmp(&b.target));
        out
    }

    fn with_breaker<R>(
        &self,
        target: &str,
        f: impl FnOnce(&mut CircuitBreaker, Instant) -> R,
    ) -> R {
        let (result, transitions) = {
            let mut breakers = self.breakers.lock();
            let breaker = breakers
                .entry(target.to_string())
                .or_insert_with(|| CircuitBreaker::new(target, self.config.clone()));
            let result = f(breaker, Instant::now());
            (result, breaker.take_transitions())
        };
        for transition in transitions {
            self.report(&transition);
        }
        result
    }

    fn report(&self, transition: &BreakerTransition) {
        if transition.to == BreakerState::Open {
            warn!(
                target_name = %transition.target,
                from = transition.from.as_str(),
                reason = transition.reason,
                "circuit breaker opened"
            );
        } else {
            info!(
                target_name = %transition.target,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                reason = transition.reason,
                "circuit breaker transition"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_breaker_transition(
                &transition.target,
                transition.from.as_str(),
                transition.to.as_str(),
            );
        }
    }
}
