use crate::domain::boundary::{AuditEvent, AuditOutcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

pub const AUDIT_TARGET: &str = "bastion::audit";

/// Bounded in-memory record of boundary decisions. Oldest entries are
/// evicted first; nothing is persisted.
pub struct AuditTrail {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    retention: Option<Duration>,
}

impl AuditTrail {
    pub fn new(capacity: usize, retention: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            retention,
        }
    }

    pub fn record(&self, event: AuditEvent) {
        if event.outcome == AuditOutcome::Allowed {
            debug!(
                target: AUDIT_TARGET,
                correlation_id = %event.correlation_id,
                channel = %event.channel,
                size = ?event.message_size,
                "boundary allowed"
            );
        } else {
            warn!(
                target: AUDIT_TARGET,
                correlation_id = %event.correlation_id,
                channel = %event.channel,
                outcome = event.outcome.as_str(),
                reason = ?event.reason,
                size = ?event.message_size,
                "boundary denied"
            );
        }
        let mut events = self.events.lock();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Drops events older than the retention window.
    pub fn trim_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = now - retention;
        let mut events = self.events.lock();
        let before = events.len();
        while events.front().is_some_and(|event| event.timestamp < cutoff) {
            events.pop_front();
        }
        before - events.len()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::boundary::CorrelationId;

    fn event(channel: &str) -> AuditEvent {
        AuditEvent::new(
            CorrelationId::new(),
            channel,
            AuditOutcome::Allowed,
            None,
            Some(2),
        )
    }

    #[test]
    fn ring_evicts_oldest() {
        let trail = AuditTrail::new(3, None);
        for name in ["a", "b", "c", "d"] {
            trail.record(event(name));
        }
        let channels: Vec<String> = trail.recent(10).into_iter().map(|e| e.channel).collect();
        assert_eq!(channels, vec!["b", "c", "d"]);
        let last: Vec<String> = trail.recent(1).into_iter().map(|e| e.channel).collect();
        assert_eq!(last, vec!["d"]);
    }

    #[test]
    fn trims_by_retention() {
        let trail = AuditTrail::new(10, Some(Duration::from_secs(60)));
        trail.record(event("a"));
        assert_eq!(trail.trim_expired(Utc::now()), 0);
        assert_eq!(
            trail.trim_expired(Utc::now() + chrono::Duration::seconds(61)),
            1
        );
        assert!(trail.is_empty());
    }
}
