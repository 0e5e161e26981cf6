use crate::domain::session::PersistedSession;
use crate::ports::session::{SessionStore, SessionStoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct InMemorySessionStore {
    name: String,
    slot: Mutex<Option<PersistedSession>>,
    writes: AtomicUsize,
}

impl InMemorySessionStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of `save` calls observed.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn put(&self, envelope: PersistedSession) {
        *self.slot.lock() = Some(envelope);
    }

    pub fn snapshot(&self) -> Option<PersistedSession> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Option<PersistedSession>, SessionStoreError> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, envelope: &PersistedSession) -> Result<(), SessionStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock() = Some(envelope.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionStoreError> {
        *self.slot.lock() = None;
        Ok(())
    }
}
