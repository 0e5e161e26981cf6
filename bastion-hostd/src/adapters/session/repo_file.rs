use crate::adapters::supervisor::state_file::write_atomic;
use crate::domain::session::PersistedSession;
use crate::ports::session::{SessionStore, SessionStoreError};
use async_trait::async_trait;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tokio::fs;

pub struct FileSessionStore {
    name: String,
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Option<PersistedSession>, SessionStoreError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if data.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|err| SessionStoreError::Corrupt(err.to_string()))
    }

    async fn save(&self, envelope: &PersistedSession) -> Result<(), SessionStoreError> {
        let json = serde_json::to_vec_pretty(envelope)
            .map_err(|err| SessionStoreError::Corrupt(err.to_string()))?;
        write_atomic(&self.path, &json)
            .await
            .map_err(|err| {
                SessionStoreError::Io(io::Error::new(ErrorKind::Other, format!("{err:#}")))
            })
    }

    async fn clear(&self) -> Result<(), SessionStoreError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
