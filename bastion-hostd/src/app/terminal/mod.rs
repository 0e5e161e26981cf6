pub mod model;
pub mod service;

pub use model::{CreateTerminal, TerminalChunk, TerminalId, TerminalInfo};
pub use service::{TerminalError, TerminalSessions, DEFAULT_MAX_TERMINALS};
