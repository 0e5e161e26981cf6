use super::model::{
    CreateTerminal, TerminalChunk, TerminalId, TerminalInfo, DEFAULT_COLS, DEFAULT_ROWS,
};
use crate::ports::supervisor::LaunchError;
use crate::ports::terminal::{TerminalProcess, TerminalSpawnRequest, TerminalSpawner};
use crate::stream::{StreamPublisher, Subscription};
use chrono::Utc;
use futures::{future, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_TERMINALS: usize = 16;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("terminal not found: {0}")]
    NotFound(String),
    #[error("invalid terminal request: {0}")]
    Invalid(String),
    #[error("terminal limit of {0} reached")]
    Limit(usize),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("terminal io failed: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported terminal channel: {0}")]
    Unsupported(String),
}

struct TerminalEntry {
    process: Box<dyn TerminalProcess>,
    info: TerminalInfo,
}

#[derive(Deserialize)]
struct TargetArgs {
    terminal_id: TerminalId,
}

#[derive(Deserialize)]
struct WriteArgs {
    terminal_id: TerminalId,
    data: String,
}

#[derive(Deserialize)]
struct ResizeArgs {
    terminal_id: TerminalId,
    cols: u16,
    rows: u16,
}

/// Shell subprocesses owned by the UI. Output from every terminal is fanned
/// out on one typed stream keyed by terminal id.
pub struct TerminalSessions {
    spawner: Arc<dyn TerminalSpawner>,
    output: StreamPublisher<TerminalChunk>,
    entries: Mutex<HashMap<TerminalId, TerminalEntry>>,
    max_terminals: usize,
}

impl TerminalSessions {
    pub fn new(spawner: Arc<dyn TerminalSpawner>, max_terminals: usize) -> Self {
        Self {
            spawner,
            output: StreamPublisher::default(),
            entries: Mutex::new(HashMap::new()),
            max_terminals,
        }
    }

    pub fn subscribe(&self) -> Subscription<TerminalChunk> {
        self.output.subscribe()
    }

    /// Output of a single terminal. Dropping the stream unsubscribes.
    pub async fn output(
        &self,
        id: &TerminalId,
    ) -> Result<impl Stream<Item = TerminalChunk> + Send + 'static, TerminalError> {
        let subscription = {
            let entries = self.entries.lock().await;
            if !entries.contains_key(id) {
                return Err(TerminalError::NotFound(id.to_string()));
            }
            self.output.subscribe()
        };
        let id = id.clone();
        Ok(subscription
            .into_stream()
            .filter(move |chunk| future::ready(chunk.terminal_id == id)))
    }

    pub fn output_subscribers(&self) -> usize {
        self.output.subscriber_count()
    }

    pub async fn create(&self, request: CreateTerminal) -> Result<TerminalInfo, TerminalError> {
        let cols = request.cols.unwrap_or(DEFAULT_COLS);
        let rows = request.rows.unwrap_or(DEFAULT_ROWS);
        if cols == 0 || rows == 0 {
            return Err(TerminalError::Invalid("cols and rows must be positive".into()));
        }

        let mut entries = self.entries.lock().await;
        reap_exited(&mut entries);
        if entries.len() >= self.max_terminals {
            return Err(TerminalError::Limit(self.max_terminals));
        }

        let spawn = TerminalSpawnRequest {
            id: TerminalId::new(),
            shell: request.shell.clone(),
            cwd: request.cwd,
            env: request.env,
            cols,
            rows,
        };
        let process = self.spawner.spawn(&spawn, self.output.clone()).await?;
        let info = TerminalInfo {
            terminal_id: spawn.id.clone(),
            pid: process.pid(),
            shell: request.shell,
            cols,
            rows,
            created_at: Utc::now(),
            exit: None,
        };
        info!(terminal = %info.terminal_id, pid = ?info.pid, "terminal created");
        entries.insert(
            spawn.id,
            TerminalEntry {
                process,
                info: info.clone(),
            },
        );
        Ok(info)
    }

    pub async fn write(&self, id: &TerminalId, data: &[u8]) -> Result<(), TerminalError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| TerminalError::NotFound(id.to_string()))?;
        entry.process.write(data).await?;
        Ok(())
    }

    /// The size is recorded and reported back; the shell is not signalled.
    pub async fn resize(
        &self,
        id: &TerminalId,
        cols: u16,
        rows: u16,
    ) -> Result<TerminalInfo, TerminalError> {
        if cols == 0 || rows == 0 {
            return Err(TerminalError::Invalid("cols and rows must be positive".into()));
        }
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| TerminalError::NotFound(id.to_string()))?;
        entry.info.cols = cols;
        entry.info.rows = rows;
        debug!(terminal = %id, cols, rows, "terminal resized");
        Ok(entry.info.clone())
    }

    pub async fn kill(&self, id: &TerminalId) -> Result<TerminalInfo, TerminalError> {
        let mut entry = self
            .entries
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| TerminalError::NotFound(id.to_string()))?;
        if entry.process.try_wait()?.is_none() {
            entry.process.kill().await?;
        }
        entry.info.exit = entry.process.try_wait().ok().flatten();
        info!(terminal = %id, "terminal killed");
        Ok(entry.info)
    }

    pub async fn list(&self) -> Vec<TerminalInfo> {
        let mut entries = self.entries.lock().await;
        let mut infos: Vec<TerminalInfo> = entries
            .values_mut()
            .map(|entry| {
                if entry.info.exit.is_none() {
                    entry.info.exit = entry.process.try_wait().ok().flatten();
                }
                entry.info.clone()
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.entries.lock().await.drain().collect();
        for (id, mut entry) in drained {
            if let Err(err) = entry.process.kill().await {
                warn!(terminal = %id, %err, "failed to kill terminal on shutdown");
            }
        }
    }

    /// Dispatches a `terminal:*` boundary call.
    pub async fn handle(&self, channel: &str, payload: Value) -> Result<Value, TerminalError> {
        match channel {
            "terminal:create" => {
                let request = if payload.is_null() {
                    CreateTerminal::default()
                } else {
                    parse::<CreateTerminal>(payload)?
                };
                Ok(json!(self.create(request).await?))
            }
            "terminal:write" => {
                let args: WriteArgs = parse(payload)?;
                self.write(&args.terminal_id, args.data.as_bytes()).await?;
                Ok(json!({ "written": args.data.len() }))
            }
            "terminal:resize" => {
                let args: ResizeArgs = parse(payload)?;
                Ok(json!(self.resize(&args.terminal_id, args.cols, args.rows).await?))
            }
            "terminal:kill" => {
                let args: TargetArgs = parse(payload)?;
                Ok(json!(self.kill(&args.terminal_id).await?))
            }
            "terminal:list" => Ok(json!({ "terminals": self.list().await })),
            other => Err(TerminalError::Unsupported(other.to_string())),
        }
    }
}

/// Drops shells that exited on their own so they stop counting toward the
/// terminal limit.
fn reap_exited(entries: &mut HashMap<TerminalId, TerminalEntry>) {
    entries.retain(|id, entry| match entry.process.try_wait() {
        Ok(Some(exit)) => {
            info!(terminal = %id, %exit, "terminal exited; reaped");
            false
        }
        Ok(None) => true,
        Err(err) => {
            warn!(terminal = %id, %err, "terminal status unknown; reaped");
            false
        }
    });
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, TerminalError> {
    serde_json::from_value(payload).map_err(|err| TerminalError::Invalid(err.to_string()))
}
