use crate::app::breaker::{BreakerRegistry, BACKEND_TARGET};
use crate::domain::supervisor::{BackendProcessRecord, BackendState};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn from_backend(state: BackendState) -> Self {
        match state {
            BackendState::Healthy => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Derives the transport connection state from supervisor health. Recovery
/// closes the backend breaker; an unhealthy backend opens it.
pub fn spawn_connection_monitor(
    mut backend: watch::Receiver<BackendProcessRecord>,
    breakers: Arc<BreakerRegistry>,
) -> (watch::Receiver<ConnectionState>, JoinHandle<()>) {
    let mut last = backend.borrow_and_update().state;
    let (tx, rx) = watch::channel(ConnectionState::from_backend(last));
    let task = tokio::spawn(async move {
        while backend.changed().await.is_ok() {
            let state = backend.borrow_and_update().state;
            if state == last {
                continue;
            }
            last = state;
            match state {
                BackendState::Healthy => breakers.reset(BACKEND_TARGET, "backend healthy"),
                BackendState::Unhealthy => breakers.trip(BACKEND_TARGET, "backend unhealthy"),
                _ => {}
            }
            let next = ConnectionState::from_backend(state);
            let changed = tx.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });
            if changed {
                match next {
                    ConnectionState::Connected => info!("backend connection established"),
                    ConnectionState::Disconnected => {
                        warn!(backend_state = state.as_str(), "backend connection lost")
                    }
                }
            }
        }
    });
    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::breaker::{BreakerConfig, BreakerState};

    fn record(state: BackendState) -> BackendProcessRecord {
        BackendProcessRecord {
            state,
            port: Some(8100),
            ..BackendProcessRecord::default()
        }
    }

    #[tokio::test]
    async fn follows_backend_health_and_drives_breaker() {
        let (backend_tx, backend_rx) = watch::channel(record(BackendState::Starting));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default(), None));
        let (mut connection, _task) = spawn_connection_monitor(backend_rx, breakers.clone());
        assert_eq!(*connection.borrow(), ConnectionState::Disconnected);

        backend_tx.send(record(BackendState::Healthy)).unwrap();
        connection.changed().await.unwrap();
        assert_eq!(*connection.borrow_and_update(), ConnectionState::Connected);

        backend_tx.send(record(BackendState::Unhealthy)).unwrap();
        connection.changed().await.unwrap();
        assert_eq!(*connection.borrow_and_update(), ConnectionState::Disconnected);
        assert_eq!(breakers.state(BACKEND_TARGET), BreakerState::Open);

        backend_tx.send(record(BackendState::Healthy)).unwrap();
        connection.changed().await.unwrap();
        assert_eq!(breakers.state(BACKEND_TARGET), BreakerState::Closed);
    }
}
