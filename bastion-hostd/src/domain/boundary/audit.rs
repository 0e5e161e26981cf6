use super::sanitize::sanitize_text;
use super::value_object::{AuditOutcome, CorrelationId};
use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_AUDITED_CHANNEL_LEN: usize = 64;
const MAX_REASON_LEN: usize = 256;

/// One boundary decision. Constructed already sanitized so nothing downstream
/// can leak a raw value into logs or the debug surface.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub channel: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_size: Option<usize>,
}

impl AuditEvent {
    pub fn new(
        correlation_id: CorrelationId,
        channel: &str,
        outcome: AuditOutcome,
        reason: Option<&str>,
        message_size: Option<usize>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            channel: truncate(&sanitize_text(channel), MAX_AUDITED_CHANNEL_LEN),
            outcome,
            reason: reason.map(|reason| truncate(&sanitize_text(reason), MAX_REASON_LEN)),
            message_size,
        }
    }

    pub fn is_denial(&self) -> bool {
        self.outcome != AuditOutcome::Allowed
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars).collect();
    out.push('…');
    out
}
