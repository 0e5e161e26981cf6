use super::events::BreakerTransition;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures inside `failure_window` that open the breaker.
    pub failure_threshold: u32,
    pub failure_window: Duration,
    /// Time spent open before a trial call is let through.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permit {
    /// The call may proceed. `trial` marks the single half-open probe.
    Granted { trial: bool },
    Rejected { retry_after: Duration },
}

#[derive(Clone, Debug, Serialize)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: BreakerState,
    pub failures_in_window: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_for_ms: Option<u64>,
    pub trial_in_flight: bool,
}

/// Per-target breaker. Pure state machine: every method takes the current
/// instant so callers (and tests on paused time) control the clock.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    target: String,
    config: BreakerConfig,
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    pending: Vec<BreakerTransition>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
            pending: Vec::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn try_acquire(&mut self, now: Instant) -> Permit {
        match self.state {
            BreakerState::Closed => Permit::Granted { trial: false },
            BreakerState::Open => {
                let elapsed = self.open_elapsed(now);
                if elapsed >= self.config.reset_timeout {
                    self.transition(BreakerState::HalfOpen, "reset timeout elapsed");
                    self.trial_in_flight = true;
                    Permit::Granted { trial: true }
                } else {
                    Permit::Rejected {
                        retry_after: self.config.reset_timeout - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen if self.trial_in_flight => Permit::Rejected {
                retry_after: Duration::ZERO,
            },
            BreakerState::HalfOpen => {
                self.trial_in_flight = true;
                Permit::Granted { trial: true }
            }
        }
    }

    pub fn record_success(&mut self, _now: Instant, trial: bool) {
        if trial && self.state == BreakerState::HalfOpen {
            self.failures.clear();
            self.opened_at = None;
            self.trial_in_flight = false;
            self.transition(BreakerState::Closed, "trial call succeeded");
        }
    }

    pub fn record_failure(&mut self, now: Instant, trial: bool) {
        match self.state {
            BreakerState::HalfOpen if trial => {
                self.trial_in_flight = false;
                self.opened_at = Some(now);
                self.transition(BreakerState::Open, "trial call failed");
            }
            BreakerState::Closed => {
                self.failures.push_back(now);
                self.prune(now);
                if self.failures.len() >= self.config.failure_threshold as usize {
                    self.opened_at = Some(now);
                    self.transition(BreakerState::Open, "failure threshold reached");
                }
            }
            // Late results from calls admitted before the breaker opened.
            _ => {}
        }
    }

    /// Releases a trial permit whose call ended without a verdict.
    pub fn abandon_trial(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    pub fn reset(&mut self, reason: &'static str) {
        self.failures.clear();
        self.opened_at = None;
        self.trial_in_flight = false;
        if self.state != BreakerState::Closed {
            self.transition(BreakerState::Closed, reason);
        }
    }

    pub fn trip(&mut self, now: Instant, reason: &'static str) {
        self.trial_in_flight = false;
        self.opened_at = Some(now);
        if self.state != BreakerState::Open {
            self.transition(BreakerState::Open, reason);
        }
    }

    pub fn take_transitions(&mut self) -> Vec<BreakerTransition> {
        std::mem::take(&mut self.pending)
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let failures_in_window = self
            .failures
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < self.config.failure_window)
            .count();
        BreakerSnapshot {
            target: self.target.clone(),
            state: self.state,
            failures_in_window,
            open_for_ms: self
                .opened_at
                .map(|opened| now.saturating_duration_since(opened).as_millis() as u64),
            trial_in_flight: self.trial_in_flight,
        }
    }

    fn open_elapsed(&self, now: Instant) -> Duration {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened))
            .unwrap_or(self.config.reset_timeout)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.failures.front() {
            if now.saturating_duration_since(*front) >= self.config.failure_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, to: BreakerState, reason: &'static str) {
        let from = self.state;
        self.state = to;
        self.pending
            .push(BreakerTransition::new(&self.target, from, to, reason));
    }
}
