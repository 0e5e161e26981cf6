use crate::domain::supervisor::BackendProcessRecord;
use crate::ports::transport::{BackendTransport, TransportError, TransportRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const MAX_ERROR_BODY: usize = 512;

/// Forwards calls to the backend task API at `POST /rpc` on whatever port
/// the supervisor currently reports.
pub struct HttpBackendTransport {
    client: reqwest::Client,
    backend: watch::Receiver<BackendProcessRecord>,
}

impl HttpBackendTransport {
    pub fn new(backend: watch::Receiver<BackendProcessRecord>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { client, backend })
    }
}

#[async_trait]
impl BackendTransport for HttpBackendTransport {
    async fn call(&self, request: TransportRequest) -> Result<Value, TransportError> {
        let port = self
            .backend
            .borrow()
            .port
            .ok_or_else(|| TransportError::Unavailable("backend port unknown".into()))?;
        let url = format!("http://127.0.0.1:{port}/rpc");
        let response = self
            .client
            .post(&url)
            .header(CORRELATION_HEADER, request.correlation_id.as_str())
            .json(&json!({
                "channel": request.channel,
                "payload": request.payload,
            }))
            .send()
            .await
            .map_err(|err| TransportError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(TransportError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }
}
