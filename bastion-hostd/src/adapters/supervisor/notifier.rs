use super::state_file::write_atomic;
use crate::app::supervisor::BACKEND_LOG_TARGET;
use crate::domain::supervisor::FatalReport;
use crate::ports::supervisor::FatalNotifier;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{error, warn};

/// Reports fatal supervisor failures to the log and, when a state directory
/// is configured, as a `fatal-<correlation>.json` file next to it.
pub struct TracingFatalNotifier {
    report_dir: Option<PathBuf>,
}

impl TracingFatalNotifier {
    pub fn new(report_dir: Option<PathBuf>) -> Self {
        Self { report_dir }
    }
}

#[async_trait]
impl FatalNotifier for TracingFatalNotifier {
    async fn notify(&self, report: &FatalReport) {
        error!(
            correlation_id = %report.correlation_id,
            reason = ?report.reason,
            attempts = report.attempts.len(),
            suggestions = ?report.suggestions,
            "backend failed to start: {}",
            report.message
        );
        for line in &report.log_tail {
            error!(target: BACKEND_LOG_TARGET, "{line}");
        }

        let Some(dir) = &self.report_dir else {
            return;
        };
        let path = dir.join(format!("fatal-{}.json", report.correlation_id));
        let json = match serde_json::to_vec_pretty(report) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "failed to encode fatal report");
                return;
            }
        };
        if let Err(err) = write_atomic(&path, &json).await {
            warn!(%err, path = %path.display(), "failed to write fatal report");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::supervisor::FatalReason;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_report_file() {
        let dir = tempdir().unwrap();
        let notifier = TracingFatalNotifier::new(Some(dir.path().to_path_buf()));
        let report = FatalReport::new(
            FatalReason::StartupTimeout,
            "health never passed",
            Vec::new(),
            vec!["booting".into()],
        );
        notifier.notify(&report).await;
        let path = dir
            .path()
            .join(format!("fatal-{}.json", report.correlation_id));
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(written["reason"], "startup_timeout");
        assert_eq!(written["log_tail"][0], "booting");
    }
}
