pub mod aggregate;
pub mod log;
pub mod report;

pub use aggregate::{BackendProcessRecord, BackendState, StateChange};
pub use log::{LogLevel, LogLine, LogStream};
pub use report::{FatalReason, FatalReport, LaunchAttempt};
