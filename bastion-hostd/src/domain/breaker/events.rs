use super::aggregate::BreakerState;
use serde::Serialize;

/// State change observed on a breaker; surfaced to logs and metrics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BreakerTransition {
    pub target: String,
    pub from: BreakerState,
    pub to: BreakerState,
    pub reason: &'static str,
}

impl BreakerTransition {
    pub fn new(target: &str, from: BreakerState, to: BreakerState, reason: &'static str) -> Self {
        Self {
            target: target.to_string(),
            from,
            to,
            reason,
        }
    }
}
