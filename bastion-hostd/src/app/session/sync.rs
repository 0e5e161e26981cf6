use crate::domain::session::SessionSync;
use tokio::sync::broadcast;

const SYNC_CAPACITY: usize = 64;

/// Local broadcast bus shared by every session service instance in the
/// process. Each instance ignores messages carrying its own origin.
#[derive(Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<SessionSync>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SYNC_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, message: SessionSync) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSync> {
        self.tx.subscribe()
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}
