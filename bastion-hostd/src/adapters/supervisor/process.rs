use crate::domain::supervisor::{LogLine, LogStream};
use crate::ports::supervisor::{
    BackendChild, ExitInfo, LaunchError, LaunchSpec, OutputSink, ProcessLauncher,
};
use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        output: Arc<dyn OutputSink>,
    ) -> Result<Box<dyn BackendChild>, LaunchError> {
        let program = which::which(&spec.program)
            .map_err(|_| LaunchError::NotFound(spec.program.clone()))?;

        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => LaunchError::NotFound(spec.program.clone()),
            _ => LaunchError::Io(err.to_string()),
        })?;
        debug!(pid = ?child.id(), command = %spec.display_command(), "backend process spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, LogStream::Stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, LogStream::Stderr, output));
        }

        Ok(Box::new(TokioChild { child }))
    }

    async fn terminate_pid(&self, pid: u32) -> io::Result<()> {
        if pid == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal pid 0"));
        }
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
        }
        #[cfg(not(unix))]
        {
            let status = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/F"])
                .status()
                .await?;
            if status.success() {
                Ok(())
            } else {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("taskkill exited with {status}"),
                ))
            }
        }
    }

    async fn is_running(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        #[cfg(unix)]
        {
            use nix::unistd::Pid;
            let Ok(raw) = i32::try_from(pid) else {
                return false;
            };
            // Signal 0 only checks that the process exists.
            nix::sys::signal::kill(Pid::from_raw(raw), None).is_ok()
        }
        #[cfg(not(unix))]
        {
            match Command::new("tasklist")
                .args(["/FI", &format!("PID eq {pid}"), "/NH"])
                .output()
                .await
            {
                Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()),
                Err(_) => false,
            }
        }
    }
}

async fn pump_lines<R>(reader: R, stream: LogStream, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink.push(LogLine::new(stream, line)),
            Ok(None) => break,
            Err(err) => {
                debug!(%err, ?stream, "backend output stream closed");
                break;
            }
        }
    }
}

struct TokioChild {
    child: Child,
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    ExitInfo {
        code: status.code(),
        signal,
    }
}

#[async_trait]
impl BackendChild for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(exit_info))
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        Ok(exit_info(self.child.wait().await?))
    }

    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            match self.child.id() {
                Some(pid) => {
                    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
                }
                None => Ok(()),
            }
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}
