use crate::domain::supervisor::LogLine;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("spawn failed: {0}")]
    Io(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit"),
        }
    }
}

/// Receives captured stdout/stderr lines from a launched process.
pub trait OutputSink: Send + Sync {
    fn push(&self, line: LogLine);
}

#[async_trait]
pub trait BackendChild: Send + Sync {
    fn pid(&self) -> Option<u32>;
    /// Non-blocking exit check.
    fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>>;
    async fn wait(&mut self) -> std::io::Result<ExitInfo>;
    /// Graceful stop request: SIGTERM on unix, hard kill elsewhere.
    fn terminate(&mut self) -> std::io::Result<()>;
    async fn kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        output: Arc<dyn OutputSink>,
    ) -> Result<Box<dyn BackendChild>, LaunchError>;

    /// Stops a process we did not spawn ourselves (an adopted backend).
    async fn terminate_pid(&self, pid: u32) -> std::io::Result<()>;

    /// Whether `pid` names a live process right now.
    async fn is_running(&self, pid: u32) -> bool;
}
