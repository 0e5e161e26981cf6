use crate::domain::supervisor::BackendProcessRecord;
use async_trait::async_trait;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<BackendProcessRecord>>;
    async fn save(&self, record: &BackendProcessRecord) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}
