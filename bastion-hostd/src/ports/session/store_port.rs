use crate::domain::session::PersistedSession;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store corrupt: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self) -> Result<Option<PersistedSession>, SessionStoreError>;
    async fn save(&self, envelope: &PersistedSession) -> Result<(), SessionStoreError>;
    async fn clear(&self) -> Result<(), SessionStoreError>;
}
