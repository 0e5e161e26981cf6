pub mod shell_port;

pub use shell_port::{TerminalProcess, TerminalSpawnRequest, TerminalSpawner};
