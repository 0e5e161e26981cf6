use crate::app::terminal::model::{TerminalChunk, TerminalId};
use crate::ports::supervisor::{ExitInfo, LaunchError};
use crate::stream::StreamPublisher;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct TerminalSpawnRequest {
    pub id: TerminalId,
    pub shell: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

/// A running shell attached to a terminal session.
#[async_trait]
pub trait TerminalProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>>;
    async fn kill(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait TerminalSpawner: Send + Sync {
    /// Output chunks are published on `output` until the process closes its
    /// pipes.
    async fn spawn(
        &self,
        request: &TerminalSpawnRequest,
        output: StreamPublisher<TerminalChunk>,
    ) -> Result<Box<dyn TerminalProcess>, LaunchError>;
}
