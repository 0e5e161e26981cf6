use crate::ports::supervisor::{HealthProbe, PortProbe};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::trace;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes `GET /health` on the loopback interface. Anything other than a
/// 200 within the timeout is unhealthy.
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        match self.client.get(&url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(err) => {
                trace!(%err, port, "health probe failed");
                false
            }
        }
    }
}

pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .await
            .is_ok()
    }

    async fn ephemeral(&self) -> std::io::Result<u16> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        Ok(listener.local_addr()?.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;

    async fn serve(status: AxumStatus) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new().route("/health", get(move || async move { status }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn only_200_is_healthy() {
        let probe = HttpHealthProbe::new(Some(Duration::from_secs(1))).unwrap();
        let ok = serve(AxumStatus::OK).await;
        let no_content = serve(AxumStatus::NO_CONTENT).await;
        let failing = serve(AxumStatus::SERVICE_UNAVAILABLE).await;
        assert!(probe.probe(ok).await);
        assert!(!probe.probe(no_content).await);
        assert!(!probe.probe(failing).await);
    }

    #[tokio::test]
    async fn closed_port_is_unhealthy_and_free() {
        let ports = TcpPortProbe;
        let port = ports.ephemeral().await.unwrap();
        assert!(ports.is_free(port).await);
        let probe = HttpHealthProbe::new(Some(Duration::from_millis(300))).unwrap();
        assert!(!probe.probe(port).await);
    }

    #[tokio::test]
    async fn bound_port_is_not_free() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!TcpPortProbe.is_free(port).await);
    }
}
