pub mod service;
pub mod sync;

pub use service::{SessionError, SessionService};
pub use sync::SessionBus;

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Sliding expiry extended on every mutation.
    pub ttl: Duration,
    /// Recovered sessions idle longer than this are discarded.
    pub max_age: Duration,
    /// Quiet period before pending mutations are written out.
    pub persist_debounce: Duration,
    /// Longest a pending mutation waits for a write under constant churn.
    pub persist_max_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3_600),
            max_age: Duration::from_secs(7 * 24 * 3_600),
            persist_debounce: Duration::from_millis(500),
            persist_max_delay: Duration::from_secs(5),
        }
    }
}
