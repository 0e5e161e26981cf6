use crate::domain::supervisor::FatalReport;
use async_trait::async_trait;

#[async_trait]
pub trait FatalNotifier: Send + Sync {
    async fn notify(&self, report: &FatalReport);
}
