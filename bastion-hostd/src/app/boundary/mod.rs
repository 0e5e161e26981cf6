pub mod audit_trail;
pub mod maintenance;
pub mod payload;
pub mod rate_limiter;
pub mod validator;

pub use audit_trail::AuditTrail;
pub use maintenance::{spawn_maintenance_task, MaintenanceHandle};
pub use rate_limiter::{RateDecision, RateLimiter, RateOccupancy};
pub use validator::{Admission, BoundaryRejection, ChannelValidator};

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct BoundaryConfig {
    pub audit_capacity: usize,
    pub audit_retention: Option<Duration>,
    /// Idle time after which a channel's rate tracker is dropped.
    pub rate_cleanup_threshold: Duration,
    pub maintenance_interval: Duration,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            audit_capacity: 1_000,
            audit_retention: Some(Duration::from_secs(3_600)),
            rate_cleanup_threshold: Duration::from_secs(300),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}
