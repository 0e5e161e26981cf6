use super::value_object::{InstanceId, SessionId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub recovery_count: u32,
    pub last_active_at: DateTime<Utc>,
    /// Lamport clock advanced on every mutation and on every observed update.
    pub logical_clock: u64,
    /// Instance that produced the latest mutation.
    pub origin: InstanceId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub data: BTreeMap<String, Value>,
    pub metadata: SessionMetadata,
}

impl SessionState {
    pub fn new(ttl: std::time::Duration, origin: InstanceId) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            created_at: now,
            expires_at: now + to_chrono(ttl),
            data: BTreeMap::new(),
            metadata: SessionMetadata {
                recovery_count: 0,
                last_active_at: now,
                logical_clock: 0,
                origin,
            },
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value, origin: &InstanceId) {
        self.data.insert(key.into(), value);
        self.bump(origin);
    }

    pub fn remove(&mut self, key: &str, origin: &InstanceId) -> Option<Value> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.bump(origin);
        }
        removed
    }

    /// Extends the expiry window from now.
    pub fn touch(&mut self, ttl: std::time::Duration, origin: &InstanceId) {
        self.expires_at = Utc::now() + to_chrono(ttl);
        self.bump(origin);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_older_than(&self, max_age: std::time::Duration, now: DateTime<Utc>) -> bool {
        now - self.metadata.last_active_at > to_chrono(max_age)
    }

    pub fn mark_recovered(&mut self) {
        self.metadata.recovery_count = self.metadata.recovery_count.saturating_add(1);
    }

    /// Whether this copy wins over `other` under last-writer-wins.
    pub fn supersedes(&self, other: &SessionState) -> bool {
        (self.metadata.logical_clock, &self.metadata.origin)
            > (other.metadata.logical_clock, &other.metadata.origin)
    }

    /// Advances the local clock past a clock seen from another instance.
    pub fn observe_clock(&mut self, remote: u64) {
        self.metadata.logical_clock = self.metadata.logical_clock.max(remote);
    }

    fn bump(&mut self, origin: &InstanceId) {
        self.metadata.logical_clock = self.metadata.logical_clock.saturating_add(1);
        self.metadata.origin = origin.clone();
        self.metadata.last_active_at = Utc::now();
    }
}

fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(36_500))
}

/// Message exchanged between instances over the local sync bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionSync {
    Upsert {
        state: SessionState,
    },
    Destroyed {
        session_id: SessionId,
        logical_clock: u64,
        origin: InstanceId,
    },
}

impl SessionSync {
    pub fn origin(&self) -> &InstanceId {
        match self {
            SessionSync::Upsert { state } => &state.metadata.origin,
            SessionSync::Destroyed { origin, .. } => origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn mutations_advance_clock_and_origin() {
        let a = InstanceId::from_string("a");
        let b = InstanceId::from_string("b");
        let mut state = SessionState::new(Duration::from_secs(60), a.clone());
        state.set("theme", json!("dark"), &a);
        state.set("tab", json!(2), &b);
        assert_eq!(state.metadata.logical_clock, 2);
        assert_eq!(state.metadata.origin, b);
        assert!(state.remove("missing", &a).is_none());
        assert_eq!(state.metadata.logical_clock, 2);
    }

    #[test]
    fn last_writer_wins_breaks_ties_by_instance() {
        let a = InstanceId::from_string("a");
        let b = InstanceId::from_string("b");
        let mut left = SessionState::new(Duration::from_secs(60), a.clone());
        let mut right = left.clone();
        left.set("k", json!(1), &a);
        right.set("k", json!(2), &b);
        assert!(right.supersedes(&left));
        assert!(!left.supersedes(&right));

        left.set("k", json!(3), &a);
        assert!(left.supersedes(&right));
    }

    #[test]
    fn expiry_and_age_checks() {
        let origin = InstanceId::new();
        let state = SessionState::new(Duration::from_secs(10), origin);
        let now = Utc::now();
        assert!(!state.is_expired(now));
        assert!(state.is_expired(now + ChronoDuration::seconds(11)));
        assert!(state.is_older_than(Duration::from_secs(5), now + ChronoDuration::seconds(6)));
    }

    #[test]
    fn sync_message_is_tagged() {
        let origin = InstanceId::from_string("a");
        let message = SessionSync::Destroyed {
            session_id: SessionId::new(),
            logical_clock: 4,
            origin: origin.clone(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "destroyed");
        assert_eq!(message.origin(), &origin);
    }
}
