use async_trait::async_trait;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True only when the backend on `port` reports ready.
    async fn probe(&self, port: u16) -> bool;
}

#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_free(&self, port: u16) -> bool;
    /// Asks the OS for an unused port.
    async fn ephemeral(&self) -> std::io::Result<u16>;
}
