use super::sync::SessionBus;
use super::SessionConfig;
use crate::domain::session::{
    EnvelopeError, InstanceId, PersistedSession, SessionState, SessionSync,
};
use crate::ports::session::{SessionStore, SessionStoreError};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session request: {0}")]
    Invalid(String),
    #[error("unsupported session channel: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Store(#[from] SessionStoreError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

enum PersistSignal {
    Dirty,
    Flush(oneshot::Sender<()>),
}

struct Shared {
    instance: InstanceId,
    config: SessionConfig,
    primary: Arc<dyn SessionStore>,
    backup: Arc<dyn SessionStore>,
    current: Mutex<Option<SessionState>>,
}

#[derive(Deserialize)]
struct KeyArgs {
    key: String,
}

#[derive(Deserialize)]
struct SetArgs {
    key: String,
    #[serde(default)]
    value: Value,
}

/// The UI's single live session. Mutations are persisted after a quiet
/// period to both stores and broadcast to other instances on the bus.
pub struct SessionService {
    shared: Arc<Shared>,
    bus: SessionBus,
    persist_tx: mpsc::UnboundedSender<PersistSignal>,
    sync_task: JoinHandle<()>,
}

impl SessionService {
    pub fn start(
        config: SessionConfig,
        instance: InstanceId,
        primary: Arc<dyn SessionStore>,
        backup: Arc<dyn SessionStore>,
        bus: SessionBus,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            instance,
            config,
            primary,
            backup,
            current: Mutex::new(None),
        });
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_persist(Arc::clone(&shared), persist_rx));
        let sync_task = tokio::spawn(run_sync(
            Arc::clone(&shared),
            bus.subscribe(),
            persist_tx.clone(),
        ));
        Arc::new(Self {
            shared,
            bus,
            persist_tx,
            sync_task,
        })
    }

    pub fn instance(&self) -> &InstanceId {
        &self.shared.instance
    }

    /// Restores the last persisted session, preferring the primary copy.
    pub async fn recover(&self) -> Result<Option<SessionState>, SessionError> {
        let mut recovered = None;
        for store in [&self.shared.primary, &self.shared.backup] {
            match store.load().await {
                Ok(Some(envelope)) => match envelope.open() {
                    Ok(state) => {
                        recovered = Some(state);
                        break;
                    }
                    Err(err) => {
                        warn!(store = store.name(), %err, "discarding unreadable session copy")
                    }
                },
                Ok(None) => debug!(store = store.name(), "no persisted session"),
                Err(err) => warn!(store = store.name(), %err, "session store unavailable"),
            }
        }

        let Some(mut state) = recovered else {
            return Ok(None);
        };
        let now = Utc::now();
        if state.is_expired(now) || state.is_older_than(self.shared.config.max_age, now) {
            info!(session = state.session_id.as_str(), "discarding stale persisted session");
            self.shared.primary.clear().await?;
            self.shared.backup.clear().await?;
            return Ok(None);
        }

        state.mark_recovered();
        {
            let mut current = self.shared.current.lock();
            if let Some(live) = current.as_ref() {
                if live.supersedes(&state) {
                    return Ok(Some(live.clone()));
                }
            }
            *current = Some(state.clone());
        }
        info!(
            session = state.session_id.as_str(),
            recovery_count = state.metadata.recovery_count,
            "session recovered"
        );
        self.mark_dirty();
        Ok(Some(state))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Utc::now();
        self.shared
            .current
            .lock()
            .as_ref()
            .filter(|state| !state.is_expired(now))
            .and_then(|state| state.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: Value) -> SessionState {
        self.mutate(|state, origin| state.set(key, value, origin))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut removed = None;
        self.mutate(|state, origin| removed = state.remove(key, origin));
        removed
    }

    pub fn touch(&self) -> SessionState {
        let ttl = self.shared.config.ttl;
        self.mutate(|state, origin| state.touch(ttl, origin))
    }

    pub fn info(&self) -> Option<SessionState> {
        let now = Utc::now();
        self.shared
            .current
            .lock()
            .as_ref()
            .filter(|state| !state.is_expired(now))
            .cloned()
    }

    pub fn destroy(&self) -> bool {
        let Some(state) = self.shared.current.lock().take() else {
            return false;
        };
        info!(session = state.session_id.as_str(), "session destroyed");
        self.bus.publish(SessionSync::Destroyed {
            session_id: state.session_id,
            logical_clock: state.metadata.logical_clock.saturating_add(1),
            origin: self.shared.instance.clone(),
        });
        self.mark_dirty();
        true
    }

    /// Writes pending mutations now instead of waiting out the debounce.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.persist_tx.send(PersistSignal::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub async fn shutdown(&self) {
        self.flush().await;
        self.sync_task.abort();
    }

    /// Dispatches a `session:*` boundary call.
    pub async fn handle(&self, channel: &str, payload: Value) -> Result<Value, SessionError> {
        match channel {
            "session:get" => {
                let args: KeyArgs = parse(payload)?;
                let value = self.get(&args.key).unwrap_or(Value::Null);
                Ok(json!({ "key": args.key, "value": value }))
            }
            "session:set" => {
                let args: SetArgs = parse(payload)?;
                let state = self.set(&args.key, args.value);
                Ok(json!({
                    "session_id": state.session_id,
                    "logical_clock": state.metadata.logical_clock,
                }))
            }
            "session:remove" => {
                let args: KeyArgs = parse(payload)?;
                Ok(json!({ "removed": self.remove(&args.key) }))
            }
            "session:destroy" => Ok(json!({ "destroyed": self.destroy() })),
            "session:touch" => Ok(describe(Some(&self.touch()))),
            "session:info" => Ok(describe(self.info().as_ref())),
            other => Err(SessionError::Unsupported(other.to_string())),
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut SessionState, &InstanceId)) -> SessionState {
        let snapshot = {
            let mut current = self.shared.current.lock();
            let now = Utc::now();
            if current.as_ref().is_some_and(|state| state.is_expired(now)) {
                if let Some(expired) = current.take() {
                    info!(session = expired.session_id.as_str(), "session expired");
                }
            }
            let state = current.get_or_insert_with(|| {
                SessionState::new(self.shared.config.ttl, self.shared.instance.clone())
            });
            f(state, &self.shared.instance);
            state.clone()
        };
        self.bus.publish(SessionSync::Upsert {
            state: snapshot.clone(),
        });
        self.mark_dirty();
        snapshot
    }

    fn mark_dirty(&self) {
        let _ = self.persist_tx.send(PersistSignal::Dirty);
    }
}

impl Drop for SessionService {
    fn drop(&mut self) {
        self.sync_task.abort();
    }
}

fn describe(state: Option<&SessionState>) -> Value {
    match state {
        Some(state) => json!({
            "session_id": state.session_id,
            "created_at": state.created_at,
            "expires_at": state.expires_at,
            "keys": state.data.keys().collect::<Vec<_>>(),
            "metadata": state.metadata,
        }),
        None => Value::Null,
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, SessionError> {
    serde_json::from_value(payload).map_err(|err| SessionError::Invalid(err.to_string()))
}

async fn run_persist(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<PersistSignal>) {
    let mut deadline: Option<Instant> = None;
    let mut first_pending: Option<Instant> = None;
    loop {
        let pending = deadline;
        let wait = async move {
            match pending {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            signal = rx.recv() => match signal {
                Some(PersistSignal::Dirty) => {
                    let now = Instant::now();
                    let first = *first_pending.get_or_insert(now);
                    deadline = Some(
                        (now + shared.config.persist_debounce)
                            .min(first + shared.config.persist_max_delay),
                    );
                }
                Some(PersistSignal::Flush(done)) => {
                    first_pending = None;
                    if deadline.take().is_some() {
                        persist(&shared).await;
                    }
                    let _ = done.send(());
                }
                None => {
                    if deadline.is_some() {
                        persist(&shared).await;
                    }
                    break;
                }
            },
            _ = wait => {
                deadline = None;
                first_pending = None;
                persist(&shared).await;
            }
        }
    }
}

async fn persist(shared: &Shared) {
    let snapshot = shared.current.lock().clone();
    let stores = [&shared.primary, &shared.backup];
    match snapshot {
        Some(state) => {
            let envelope = match PersistedSession::seal(state) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(%err, "failed to seal session");
                    return;
                }
            };
            for store in stores {
                if let Err(err) = store.save(&envelope).await {
                    warn!(store = store.name(), %err, "failed to persist session");
                }
            }
            debug!(session = envelope.session.session_id.as_str(), "session persisted");
        }
        None => {
            for store in stores {
                if let Err(err) = store.clear().await {
                    warn!(store = store.name(), %err, "failed to clear persisted session");
                }
            }
        }
    }
}

async fn run_sync(
    shared: Arc<Shared>,
    mut rx: tokio::sync::broadcast::Receiver<SessionSync>,
    persist_tx: mpsc::UnboundedSender<PersistSignal>,
) {
    loop {
        let message = match rx.recv().await {
            Ok(message) => message,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "session sync lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if message.origin() == &shared.instance {
            continue;
        }
        if apply_remote(&shared, message) {
            let _ = persist_tx.send(PersistSignal::Dirty);
        }
    }
}

/// Last-writer-wins on (logical clock, origin). Returns whether local state
/// changed.
fn apply_remote(shared: &Shared, message: SessionSync) -> bool {
    let mut current = shared.current.lock();
    match message {
        SessionSync::Upsert { state: remote } => {
            if let Some(local) = current.as_mut() {
                if !remote.supersedes(local) {
                    local.observe_clock(remote.metadata.logical_clock);
                    debug!(session = local.session_id.as_str(), "ignored stale session update");
                    return false;
                }
            }
            *current = Some(remote);
            true
        }
        SessionSync::Destroyed {
            session_id,
            logical_clock,
            origin,
        } => {
            let wins = current.as_ref().is_some_and(|local| {
                local.session_id == session_id
                    && (logical_clock, &origin)
                        > (local.metadata.logical_clock, &local.metadata.origin)
            });
            if wins {
                *current = None;
            }
            wins
        }
    }
}
