use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Lifecycle,
    Warn,
    Error,
}

impl LogLevel {
    /// Levels forwarded to the daemon log by default; the rest stay in the
    /// ring buffer.
    pub fn is_surfaced(self) -> bool {
        self >= LogLevel::Lifecycle
    }
}

const ERROR_MARKERS: &[&str] = &[
    "error",
    "fatal",
    "panic",
    "exception",
    "traceback",
    "critical",
];
const WARN_MARKERS: &[&str] = &["warn", "deprecat"];
const LIFECYCLE_MARKERS: &[&str] = &[
    "listening on",
    "running on",
    "started",
    "startup complete",
    "ready",
    "shutting down",
    "shutdown complete",
    "stopped",
];
const DEBUG_MARKERS: &[&str] = &["debug", "trace"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub stream: LogStream,
    pub level: LogLevel,
    pub text: String,
}

impl LogLine {
    pub fn new(stream: LogStream, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            at: Utc::now(),
            stream,
            level: classify(&text),
            text,
        }
    }
}

pub fn classify(line: &str) -> LogLevel {
    let lower = line.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|marker| lower.contains(marker));
    if has(ERROR_MARKERS) {
        LogLevel::Error
    } else if has(WARN_MARKERS) {
        LogLevel::Warn
    } else if has(LIFECYCLE_MARKERS) {
        LogLevel::Lifecycle
    } else if has(DEBUG_MARKERS) {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}
