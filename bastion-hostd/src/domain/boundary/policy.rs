use super::value_object::{ChannelName, MAX_CHANNEL_NAME_LEN};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_CALLS_PER_WINDOW: u32 = 100;
pub const DEFAULT_WINDOW_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WhitelistError {
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("duplicate pattern {0:?}")]
    Duplicate(String),
    #[error("patterns {first:?} and {second:?} overlap with equal specificity")]
    Ambiguous { first: String, second: String },
    #[error("invalid limit for {pattern:?}: {reason}")]
    InvalidLimit { pattern: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelCategory {
    /// Forwarded to the backend service task API.
    Backend,
    /// Routed to a local terminal subprocess session.
    Terminal,
    /// Served by the session store.
    Session,
    /// Answered by the supervisor itself.
    System,
}

impl ChannelCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelCategory::Backend => "backend",
            ChannelCategory::Terminal => "terminal",
            ChannelCategory::Session => "session",
            ChannelCategory::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PatternKind {
    Exact,
    Wildcard { prefix: String, suffix: String },
}

/// Exact channel name or a pattern containing a single `*`.
///
/// Matching is plain prefix/suffix comparison, linear in the channel length
/// whatever the pattern looks like.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelPattern {
    raw: String,
    kind: PatternKind,
}

impl ChannelPattern {
    pub fn parse(raw: &str) -> Result<Self, WhitelistError> {
        let invalid = |reason: &str| WhitelistError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("pattern cannot be empty"));
        }
        if raw.len() > MAX_CHANNEL_NAME_LEN {
            return Err(invalid("pattern too long"));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(invalid("pattern must be printable ASCII"));
        }
        let kind = match raw.matches('*').count() {
            0 => PatternKind::Exact,
            1 => {
                let (prefix, suffix) = raw
                    .split_once('*')
                    .ok_or_else(|| invalid("wildcard not found"))?;
                PatternKind::Wildcard {
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                }
            }
            _ => return Err(invalid("only a single wildcard is supported")),
        };
        Ok(Self {
            raw: raw.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.kind, PatternKind::Exact)
    }

    pub fn matches(&self, channel: &str) -> bool {
        match &self.kind {
            PatternKind::Exact => self.raw == channel,
            PatternKind::Wildcard { prefix, suffix } => {
                channel.len() >= prefix.len() + suffix.len()
                    && channel.starts_with(prefix.as_str())
                    && channel.ends_with(suffix.as_str())
            }
        }
    }

    /// Number of literal characters; more literal text means more specific.
    fn specificity(&self) -> usize {
        match &self.kind {
            PatternKind::Exact => self.raw.len(),
            PatternKind::Wildcard { prefix, suffix } => prefix.len() + suffix.len(),
        }
    }

    /// Whether some channel name is matched by both wildcard patterns.
    fn overlaps(&self, other: &ChannelPattern) -> bool {
        match (&self.kind, &other.kind) {
            (
                PatternKind::Wildcard {
                    prefix: p1,
                    suffix: s1,
                },
                PatternKind::Wildcard {
                    prefix: p2,
                    suffix: s2,
                },
            ) => {
                let prefixes = p1.starts_with(p2.as_str()) || p2.starts_with(p1.as_str());
                let suffixes = s1.ends_with(s2.as_str()) || s2.ends_with(s1.as_str());
                prefixes && suffixes
            }
            _ => false,
        }
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for ChannelPattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ChannelPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        ChannelPattern::parse(&value).map_err(D::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    pub pattern: ChannelPattern,
    pub category: ChannelCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls_per_window: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub deprecated: bool,
}

impl ChannelPolicy {
    pub fn new(pattern: &str, category: ChannelCategory) -> Result<Self, WhitelistError> {
        Ok(Self {
            pattern: ChannelPattern::parse(pattern)?,
            category,
            max_message_bytes: None,
            max_calls_per_window: None,
            window_ms: None,
            deprecated: false,
        })
    }

    pub fn with_max_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = Some(bytes);
        self
    }

    pub fn with_rate(mut self, calls: u32, window: Duration) -> Self {
        self.max_calls_per_window = Some(calls);
        self.window_ms = Some(window.as_millis() as u64);
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    fn check_limits(&self) -> Result<(), WhitelistError> {
        let invalid = |reason: &str| WhitelistError::InvalidLimit {
            pattern: self.pattern.to_string(),
            reason: reason.to_string(),
        };
        if self.max_message_bytes == Some(0) {
            return Err(invalid("max_message_bytes must be positive"));
        }
        if self.max_calls_per_window == Some(0) {
            return Err(invalid("max_calls_per_window must be positive"));
        }
        if self.window_ms == Some(0) {
            return Err(invalid("window_ms must be positive"));
        }
        Ok(())
    }
}

/// Global fallbacks for policies that leave a limit unset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryDefaults {
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_max_calls_per_window")]
    pub max_calls_per_window: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

const fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

const fn default_max_calls_per_window() -> u32 {
    DEFAULT_MAX_CALLS_PER_WINDOW
}

const fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

impl Default for BoundaryDefaults {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_calls_per_window: DEFAULT_MAX_CALLS_PER_WINDOW,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

/// Limits in force for one channel after applying defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub max_message_bytes: usize,
    pub max_calls: u32,
    pub window: Duration,
}

/// Serialized form of a whitelist, as read from disk.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WhitelistDocument {
    #[serde(default)]
    pub defaults: BoundaryDefaults,
    pub channels: Vec<ChannelPolicy>,
}

/// Immutable set of channel policies. Built once at startup and shared
/// behind an `Arc`; every lookup is a pure function of its input.
#[derive(Clone, Debug)]
pub struct Whitelist {
    policies: Vec<ChannelPolicy>,
    exact: HashMap<String, usize>,
    /// Indices of wildcard policies, most specific first.
    wildcards: Vec<usize>,
    defaults: BoundaryDefaults,
}

const BUILTIN_CHANNELS: &[(&str, ChannelCategory, Option<usize>, Option<u32>, bool)] = &[
    ("system:status", ChannelCategory::System, Some(1024), None, false),
    ("system:ping", ChannelCategory::System, Some(1024), None, false),
    ("backend:health", ChannelCategory::Backend, Some(1024), Some(20), false),
    ("task:create", ChannelCategory::Backend, Some(256 * 1024), Some(30), false),
    ("task:*", ChannelCategory::Backend, None, None, false),
    ("terminal:create", ChannelCategory::Terminal, Some(4096), Some(10), false),
    ("terminal:write", ChannelCategory::Terminal, Some(64 * 1024), Some(1000), false),
    ("terminal:resize", ChannelCategory::Terminal, Some(1024), None, false),
    ("terminal:kill", ChannelCategory::Terminal, Some(1024), None, false),
    ("terminal:list", ChannelCategory::Terminal, Some(1024), None, false),
    ("session:*", ChannelCategory::Session, Some(512 * 1024), None, false),
    ("legacy:*", ChannelCategory::Backend, None, Some(10), true),
];

impl Whitelist {
    pub fn new(
        policies: Vec<ChannelPolicy>,
        defaults: BoundaryDefaults,
    ) -> Result<Self, WhitelistError> {
        if defaults.max_message_bytes == 0
            || defaults.max_calls_per_window == 0
            || defaults.window_ms == 0
        {
            return Err(WhitelistError::InvalidLimit {
                pattern: "<defaults>".to_string(),
                reason: "default limits must be positive".to_string(),
            });
        }

        let mut exact = HashMap::new();
        let mut wildcards: Vec<usize> = Vec::new();
        for (index, policy) in policies.iter().enumerate() {
            policy.check_limits()?;
            if policy.pattern.is_exact() {
                if exact
                    .insert(policy.pattern.as_str().to_string(), index)
                    .is_some()
                {
                    return Err(WhitelistError::Duplicate(policy.pattern.to_string()));
                }
                continue;
            }
            for &other in &wildcards {
                let existing: &ChannelPolicy = &policies[other];
                if existing.pattern == policy.pattern {
                    return Err(WhitelistError::Duplicate(policy.pattern.to_string()));
                }
                if existing.pattern.specificity() == policy.pattern.specificity()
                    && existing.pattern.overlaps(&policy.pattern)
                {
                    return Err(WhitelistError::Ambiguous {
                        first: existing.pattern.to_string(),
                        second: policy.pattern.to_string(),
                    });
                }
            }
            wildcards.push(index);
        }
        wildcards.sort_by(|a, b| {
            policies[*b]
                .pattern
                .specificity()
                .cmp(&policies[*a].pattern.specificity())
        });

        Ok(Self {
            policies,
            exact,
            wildcards,
            defaults,
        })
    }

    pub fn from_document(document: WhitelistDocument) -> Result<Self, WhitelistError> {
        Self::new(document.channels, document.defaults)
    }

    /// Channels the application ships with.
    pub fn builtin() -> Result<Self, WhitelistError> {
        let policies = BUILTIN_CHANNELS
            .iter()
            .map(|(pattern, category, max_bytes, max_calls, deprecated)| {
                let mut policy = ChannelPolicy::new(pattern, *category)?;
                policy.max_message_bytes = *max_bytes;
                policy.max_calls_per_window = *max_calls;
                policy.deprecated = *deprecated;
                Ok(policy)
            })
            .collect::<Result<Vec<_>, WhitelistError>>()?;
        Self::new(policies, BoundaryDefaults::default())
    }

    /// Exact match first, then the most specific wildcard.
    pub fn resolve(&self, channel: &ChannelName) -> Option<&ChannelPolicy> {
        if let Some(index) = self.exact.get(channel.as_str()) {
            return self.policies.get(*index);
        }
        self.wildcards
            .iter()
            .map(|index| &self.policies[*index])
            .find(|policy| policy.pattern.matches(channel.as_str()))
    }

    pub fn limits(&self, policy: &ChannelPolicy) -> EffectiveLimits {
        EffectiveLimits {
            max_message_bytes: policy
                .max_message_bytes
                .unwrap_or(self.defaults.max_message_bytes),
            max_calls: policy
                .max_calls_per_window
                .unwrap_or(self.defaults.max_calls_per_window),
            window: Duration::from_millis(policy.window_ms.unwrap_or(self.defaults.window_ms)),
        }
    }

    pub fn policies(&self) -> &[ChannelPolicy] {
        &self.policies
    }

    pub fn defaults(&self) -> &BoundaryDefaults {
        &self.defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name(raw: &str) -> ChannelName {
        ChannelName::parse(raw).unwrap()
    }

    fn policy(pattern: &str) -> ChannelPolicy {
        ChannelPolicy::new(pattern, ChannelCategory::Backend).unwrap()
    }

    #[test]
    fn exact_match_beats_wildcard() {
        let whitelist = Whitelist::new(
            vec![
                policy("task:*").with_max_bytes(10),
                policy("task:create").with_max_bytes(20),
            ],
            BoundaryDefaults::default(),
        )
        .unwrap();
        let resolved = whitelist.resolve(&name("task:create")).unwrap();
        assert_eq!(resolved.max_message_bytes, Some(20));
        let resolved = whitelist.resolve(&name("task:list")).unwrap();
        assert_eq!(resolved.max_message_bytes, Some(10));
    }

    #[test]
    fn longer_literal_wildcard_wins_regardless_of_order() {
        let whitelist = Whitelist::new(
            vec![policy("task:*"), policy("task:admin:*").deprecated()],
            BoundaryDefaults::default(),
        )
        .unwrap();
        assert!(whitelist.resolve(&name("task:admin:purge")).unwrap().deprecated);
        assert!(!whitelist.resolve(&name("task:list")).unwrap().deprecated);
    }

    #[test]
    fn equal_specificity_overlap_is_rejected() {
        let err = Whitelist::new(
            vec![policy("a*"), policy("*a")],
            BoundaryDefaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WhitelistError::Ambiguous { .. }));

        // Same specificity but disjoint prefixes is fine.
        assert!(Whitelist::new(
            vec![policy("ab:*"), policy("cd:*")],
            BoundaryDefaults::default()
        )
        .is_ok());
    }

    #[test]
    fn duplicates_and_bad_patterns_are_rejected() {
        let err = Whitelist::new(
            vec![policy("x"), policy("x")],
            BoundaryDefaults::default(),
        )
        .unwrap_err();
        assert_eq!(err, WhitelistError::Duplicate("x".into()));
        assert!(ChannelPattern::parse("a*b*").is_err());
        assert!(ChannelPattern::parse("").is_err());
        assert!(ChannelPattern::parse("has space").is_err());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut zero = policy("x");
        zero.max_calls_per_window = Some(0);
        assert!(matches!(
            Whitelist::new(vec![zero], BoundaryDefaults::default()),
            Err(WhitelistError::InvalidLimit { .. })
        ));
    }

    #[test]
    fn wildcard_requires_room_for_both_ends() {
        let pattern = ChannelPattern::parse("ab*ba").unwrap();
        assert!(!pattern.matches("aba"));
        assert!(pattern.matches("abba"));
        assert!(pattern.matches("ab-ba"));
    }

    #[test]
    fn limits_fall_back_to_defaults() {
        let whitelist = Whitelist::new(
            vec![policy("x").with_rate(3, Duration::from_secs(2))],
            BoundaryDefaults::default(),
        )
        .unwrap();
        let limits = whitelist.limits(&whitelist.policies()[0]);
        assert_eq!(limits.max_calls, 3);
        assert_eq!(limits.window, Duration::from_secs(2));
        assert_eq!(limits.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
    }

    #[test]
    fn builtin_whitelist_is_consistent() {
        let whitelist = Whitelist::builtin().unwrap();
        let policy = whitelist.resolve(&name("terminal:write")).unwrap();
        assert_eq!(policy.category, ChannelCategory::Terminal);
        assert!(whitelist.resolve(&name("legacy:sync")).unwrap().deprecated);
        assert!(whitelist.resolve(&name("fs:read")).is_none());
    }

    #[test]
    fn document_round_trips_through_json() {
        let document: WhitelistDocument = serde_json::from_value(serde_json::json!({
            "defaults": { "max_message_bytes": 2048 },
            "channels": [
                {
                    "pattern": "task:*",
                    "category": "backend",
                    "max_calls_per_window": 5,
                    "window_ms": 500
                },
                { "pattern": "old:*", "category": "backend", "deprecated": true }
            ]
        }))
        .unwrap();
        let whitelist = Whitelist::from_document(document).unwrap();
        assert_eq!(whitelist.defaults().max_message_bytes, 2048);
        assert_eq!(
            whitelist.defaults().max_calls_per_window,
            DEFAULT_MAX_CALLS_PER_WINDOW
        );
        let limits = whitelist.limits(whitelist.resolve(&name("task:x")).unwrap());
        assert_eq!(limits.window, Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn wildcard_matching_agrees_with_naive_definition(
            prefix in "[a-c:]{0,4}",
            suffix in "[a-c:]{0,4}",
            channel in "[a-c:]{1,12}",
        ) {
            let pattern = ChannelPattern::parse(&format!("{prefix}*{suffix}")).unwrap();
            let naive = channel.len() >= prefix.len() + suffix.len()
                && channel.starts_with(&prefix)
                && channel.ends_with(&suffix);
            prop_assert_eq!(pattern.matches(&channel), naive);
        }

        #[test]
        fn resolution_is_deterministic(channel in "[a-z:]{1,24}") {
            let whitelist = Whitelist::builtin().unwrap();
            let name = ChannelName::parse(&channel).unwrap();
            let first = whitelist.resolve(&name).map(|p| p.pattern.to_string());
            for _ in 0..4 {
                let again = whitelist.resolve(&name).map(|p| p.pattern.to_string());
                prop_assert_eq!(&first, &again);
            }
        }
    }
}
