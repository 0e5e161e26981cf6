use crate::app::terminal::model::{TerminalChunk, TerminalId};
use crate::domain::supervisor::LogStream;
use crate::ports::supervisor::{ExitInfo, LaunchError};
use crate::ports::terminal::{TerminalProcess, TerminalSpawnRequest, TerminalSpawner};
use crate::stream::StreamPublisher;
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::debug;

const READ_CHUNK: usize = 4096;

#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd.exe";
#[cfg(not(windows))]
const DEFAULT_SHELL: &str = "sh";

/// Spawns shells with piped stdio. No pseudo-terminal is allocated: the
/// window size travels as `COLUMNS`/`LINES`.
pub struct ShellSpawner {
    default_shell: String,
}

impl ShellSpawner {
    pub fn new(default_shell: Option<String>) -> Self {
        Self {
            default_shell: default_shell.unwrap_or_else(|| DEFAULT_SHELL.to_string()),
        }
    }
}

impl Default for ShellSpawner {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl TerminalSpawner for ShellSpawner {
    async fn spawn(
        &self,
        request: &TerminalSpawnRequest,
        output: StreamPublisher<TerminalChunk>,
    ) -> Result<Box<dyn TerminalProcess>, LaunchError> {
        let shell = request.shell.as_deref().unwrap_or(&self.default_shell);
        let program = which::which(shell).map_err(|_| LaunchError::NotFound(shell.to_string()))?;

        let mut command = Command::new(&program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("COLUMNS", request.cols.to_string())
            .env("LINES", request.rows.to_string())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        command.envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let mut child = command.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => LaunchError::NotFound(shell.to_string()),
            _ => LaunchError::Io(err.to_string()),
        })?;
        debug!(terminal = %request.id, pid = ?child.id(), shell, "terminal shell spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_chunks(
                stdout,
                request.id.clone(),
                LogStream::Stdout,
                output.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_chunks(
                stderr,
                request.id.clone(),
                LogStream::Stderr,
                output,
            ));
        }
        let stdin = child.stdin.take();

        Ok(Box::new(ShellProcess { child, stdin }))
    }
}

async fn pump_chunks<R>(
    mut reader: R,
    terminal_id: TerminalId,
    stream: LogStream,
    output: StreamPublisher<TerminalChunk>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                output.publish(TerminalChunk {
                    terminal_id: terminal_id.clone(),
                    stream,
                    data: String::from_utf8_lossy(&buf[..n]).into_owned(),
                });
            }
            Err(err) => {
                debug!(%err, terminal = %terminal_id, ?stream, "terminal output closed");
                break;
            }
        }
    }
}

struct ShellProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl TerminalProcess for ShellProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "terminal input closed"))?;
        stdin.write_all(data).await?;
        stdin.flush().await
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(|status| ExitInfo {
            code: status.code(),
            signal: exit_signal(&status),
        }))
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.stdin = None;
        self.child.kill().await
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
