use crate::domain::supervisor::{BackendProcessRecord, BackendState};
use crate::ports::supervisor::StateStore;
use anyhow::Context;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const STATE_FILE: &str = "backend-state.json";
pub const PORT_FILE: &str = "port";

/// Persists the backend record as `backend-state.json` plus a bare `port`
/// file. Both are written atomically and are safe to delete.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn port_path(&self) -> PathBuf {
        self.dir.join(PORT_FILE)
    }

    async fn load_port_file(&self) -> Option<u16> {
        let raw = fs::read_to_string(self.port_path()).await.ok()?;
        raw.trim().parse().ok()
    }
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = fs::File::create(&tmp)
        .await
        .with_context(|| format!("creating temp file {}", tmp.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", tmp.display()))?;
    file.flush().await?;
    drop(file);
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming temp file to {}", path.display()))?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> anyhow::Result<Option<BackendProcessRecord>> {
        let path = self.state_path();
        match fs::read(&path).await {
            Ok(data) => match serde_json::from_slice::<BackendProcessRecord>(&data) {
                Ok(record) => return Ok(Some(record)),
                Err(err) => {
                    warn!(%err, path = %path.display(), "ignoring unreadable backend state file");
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        }

        // A lone port file still lets us try to reattach.
        Ok(self.load_port_file().await.map(|port| BackendProcessRecord {
            port: Some(port),
            state: BackendState::NotStarted,
            ..BackendProcessRecord::default()
        }))
    }

    async fn save(&self, record: &BackendProcessRecord) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.state_path(), &json).await?;
        match record.port {
            Some(port) => write_atomic(&self.port_path(), port.to_string().as_bytes()).await?,
            None => remove_if_exists(&self.port_path()).await?,
        }
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        remove_if_exists(&self.state_path()).await?;
        remove_if_exists(&self.port_path()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_load_clear() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("bastion"));
        assert!(store.load().await.unwrap().is_none());

        let record = BackendProcessRecord {
            pid: Some(1234),
            port: Some(8100),
            state: BackendState::Healthy,
            ..BackendProcessRecord::default()
        };
        store.save(&record).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(record));
        let port = std::fs::read_to_string(store.dir().join(PORT_FILE)).unwrap();
        assert_eq!(port, "8100");

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_state_falls_back_to_port_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), b"{not json").unwrap();
        std::fs::write(dir.path().join(PORT_FILE), b"9001\n").unwrap();
        let store = FileStateStore::new(dir.path());
        let record = store.load().await.unwrap().unwrap();
        assert_eq!(record.port, Some(9001));
        assert_eq!(record.state, BackendState::NotStarted);
    }
}
