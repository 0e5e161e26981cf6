use crate::domain::boundary::CorrelationId;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    /// Every configured runtime command failed to launch.
    SpawnExhausted,
    /// The process launched but never answered its health endpoint.
    StartupTimeout,
    /// No free port could be found or confirmed.
    PortUnavailable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LaunchAttempt {
    pub command: String,
    pub port: u16,
    pub error: String,
}

/// Diagnostic bundle handed to the user when the backend cannot be brought up.
#[derive(Clone, Debug, Serialize)]
pub struct FatalReport {
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,
    pub reason: FatalReason,
    pub message: String,
    pub attempts: Vec<LaunchAttempt>,
    pub log_tail: Vec<String>,
    pub suggestions: Vec<String>,
}

impl FatalReport {
    pub fn new(
        reason: FatalReason,
        message: impl Into<String>,
        attempts: Vec<LaunchAttempt>,
        log_tail: Vec<String>,
    ) -> Self {
        let suggestions = suggestions_for(reason, &attempts, &log_tail);
        Self {
            correlation_id: CorrelationId::new(),
            occurred_at: Utc::now(),
            reason,
            message: message.into(),
            attempts,
            log_tail,
            suggestions,
        }
    }
}

fn suggestions_for(
    reason: FatalReason,
    attempts: &[LaunchAttempt],
    log_tail: &[String],
) -> Vec<String> {
    let mut out = Vec::new();
    match reason {
        FatalReason::SpawnExhausted => {
            if attempts.iter().any(|a| a.error.contains("not found")) {
                out.push("Install the backend runtime or add it to PATH".to_string());
            }
            out.push("Check that the backend entrypoint exists and is readable".to_string());
        }
        FatalReason::StartupTimeout => {
            out.push(
                "The backend started but never reported healthy; inspect the log tail".to_string(),
            );
            out.push("Increase the startup timeout on slow machines".to_string());
        }
        FatalReason::PortUnavailable => {
            out.push("Free the preferred port or widen the scan range".to_string());
        }
    }
    let tail = log_tail.join("\n").to_ascii_lowercase();
    if tail.contains("address already in use") || tail.contains("eaddrinuse") {
        out.push("Another process is bound to the backend port".to_string());
    }
    if tail.contains("modulenotfounderror") || tail.contains("no module named") {
        out.push("Backend dependencies are missing; reinstall the application".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestions_reflect_failures() {
        let report = FatalReport::new(
            FatalReason::SpawnExhausted,
            "no runtime",
            vec![LaunchAttempt {
                command: "python3".into(),
                port: 8100,
                error: "command not found".into(),
            }],
            vec!["OSError: [Errno 98] Address already in use".into()],
        );
        assert!(report.suggestions.iter().any(|s| s.contains("PATH")));
        assert!(report.suggestions.iter().any(|s| s.contains("bound to the backend port")));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["reason"], "spawn_exhausted");
    }
}
