use super::connection::ConnectionState;
use super::error::InvokeError;
use crate::app::breaker::{CallOptions, CallOutcome, ErrorBoundary, BACKEND_TARGET};
use crate::domain::boundary::CorrelationId;
use crate::ports::transport::{BackendTransport, TransportRequest};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub type Completion = Result<CallOutcome, InvokeError>;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub capacity: usize,
    /// Queued calls older than this fail with `TIMEOUT`.
    pub max_age: Duration,
    pub expiry_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            max_age: Duration::from_secs(30),
            expiry_interval: Duration::from_secs(1),
        }
    }
}

pub struct QueuedMessage {
    pub channel: String,
    pub payload: Value,
    pub correlation_id: CorrelationId,
    pub enqueued_at: Instant,
    pub options: CallOptions,
    completion: oneshot::Sender<Completion>,
}

pub enum Enqueue {
    /// Connected with nothing ahead: call the backend directly.
    Bypass,
    Queued(oneshot::Receiver<Completion>),
    Full,
    /// The host is shutting down.
    Closed,
}

#[derive(Default)]
struct QueueInner {
    items: VecDeque<QueuedMessage>,
    draining: bool,
    closed: bool,
}

/// Backend calls made while the connection is down, delivered in arrival
/// order once it comes back.
pub struct MessageQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    wake: Notify,
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner::default()),
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn enqueue(
        &self,
        connected: bool,
        channel: &str,
        payload: Value,
        correlation_id: CorrelationId,
        options: CallOptions,
    ) -> Enqueue {
        let mut inner = self.inner.lock();
        // Calls queue behind anything still waiting so delivery order holds.
        if connected && inner.items.is_empty() && !inner.draining {
            return Enqueue::Bypass;
        }
        if inner.closed {
            return Enqueue::Closed;
        }
        if inner.items.len() >= self.config.capacity {
            return Enqueue::Full;
        }
        let (tx, rx) = oneshot::channel();
        inner.items.push_back(QueuedMessage {
            channel: channel.to_string(),
            payload,
            correlation_id,
            enqueued_at: Instant::now(),
            options,
            completion: tx,
        });
        drop(inner);
        if connected {
            self.wake.notify_one();
        }
        Enqueue::Queued(rx)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    fn pop_next(&self) -> Option<QueuedMessage> {
        let mut inner = self.inner.lock();
        let next = inner.items.pop_front();
        inner.draining = next.is_some();
        next
    }

    fn pause(&self) {
        self.inner.lock().draining = false;
    }

    fn is_expired(&self, message: &QueuedMessage, now: Instant) -> bool {
        now.duration_since(message.enqueued_at) >= self.config.max_age
    }

    /// Fails queued calls past their max age and drops abandoned ones.
    pub fn expire(&self, now: Instant) -> usize {
        let expired: Vec<QueuedMessage> = {
            let mut inner = self.inner.lock();
            let (stale, fresh): (VecDeque<_>, VecDeque<_>) = inner
                .items
                .drain(..)
                .partition(|m| self.is_expired(m, now) || m.completion.is_closed());
            inner.items = fresh;
            stale.into_iter().collect()
        };
        let count = expired.len();
        for message in expired {
            debug!(
                channel = %message.channel,
                correlation_id = %message.correlation_id,
                "queued call expired"
            );
            let _ = message.completion.send(Err(self.timeout_error()));
        }
        count
    }

    /// Rejects everything still queued and refuses new calls.
    pub fn close(&self) {
        let drained: Vec<QueuedMessage> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.items.drain(..).collect()
        };
        for message in drained {
            let _ = message
                .completion
                .send(Err(InvokeError::unknown("host shutting down")));
        }
    }

    fn timeout_error(&self) -> InvokeError {
        InvokeError::Timeout {
            timeout_ms: self.config.max_age.as_millis() as u64,
        }
    }
}

/// Sends one call to the backend through the error boundary.
pub(crate) async fn forward(
    boundary: &ErrorBoundary,
    transport: &Arc<dyn BackendTransport>,
    request: TransportRequest,
    options: &CallOptions,
) -> Completion {
    let transport = Arc::clone(transport);
    boundary
        .execute(BACKEND_TARGET, options, move || {
            let transport = Arc::clone(&transport);
            let request = request.clone();
            async move { transport.call(request).await }
        })
        .await
        .map_err(InvokeError::from)
}

#[derive(Clone)]
pub struct DrainerHandle {
    tx: mpsc::Sender<()>,
}

impl DrainerHandle {
    pub async fn shutdown(&self) {
        let _ = self.tx.send(()).await;
    }
}

/// Delivers queued calls one at a time whenever the connection is up.
pub fn spawn_queue_drainer(
    queue: Arc<MessageQueue>,
    boundary: Arc<ErrorBoundary>,
    transport: Arc<dyn BackendTransport>,
    mut connection: watch::Receiver<ConnectionState>,
) -> DrainerHandle {
    let (tx, mut rx) = mpsc::channel(1);
    let interval = queue.config.expiry_interval;
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                Some(()) = rx.recv() => {
                    queue.close();
                    info!("message queue drainer stopped");
                    break;
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        queue.close();
                        break;
                    }
                }
                _ = queue.wake.notified() => {}
                _ = ticker.tick() => {
                    queue.expire(Instant::now());
                }
            }
            drain(&queue, &boundary, &transport, &connection).await;
        }
    });
    DrainerHandle { tx }
}

async fn drain(
    queue: &MessageQueue,
    boundary: &ErrorBoundary,
    transport: &Arc<dyn BackendTransport>,
    connection: &watch::Receiver<ConnectionState>,
) {
    let mut delivered = 0usize;
    loop {
        if *connection.borrow() != ConnectionState::Connected {
            queue.pause();
            break;
        }
        let Some(message) = queue.pop_next() else {
            break;
        };
        if message.completion.is_closed() {
            continue;
        }
        if queue.is_expired(&message, Instant::now()) {
            let _ = message.completion.send(Err(queue.timeout_error()));
            continue;
        }
        let request = TransportRequest {
            channel: message.channel,
            payload: message.payload,
            correlation_id: message.correlation_id,
        };
        let outcome = forward(boundary, transport, request, &message.options).await;
        if let Err(err) = &outcome {
            warn!(code = err.code(), %err, "queued call failed on delivery");
        }
        let _ = message.completion.send(outcome);
        delivered += 1;
    }
    if delivered > 0 {
        info!(delivered, "queued calls delivered");
    }
}
