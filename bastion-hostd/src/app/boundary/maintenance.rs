use super::audit_trail::AuditTrail;
use super::rate_limiter::RateLimiter;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Clone)]
pub struct MaintenanceHandle {
    tx: mpsc::Sender<()>,
}

impl MaintenanceHandle {
    pub async fn shutdown(&self) {
        let _ = self.tx.send(()).await;
    }
}

/// Periodically sweeps idle rate trackers and trims expired audit events.
pub fn spawn_maintenance_task(
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditTrail>,
    interval: Duration,
) -> MaintenanceHandle {
    let (tx, mut rx) = mpsc::channel(1);
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = rx.recv() => {
                    info!("boundary maintenance worker stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let swept = limiter.sweep(Instant::now());
                    let trimmed = audit.trim_expired(Utc::now());
                    if swept > 0 || trimmed > 0 {
                        debug!(swept, trimmed, "boundary maintenance pass");
                    }
                }
            }
        }
    });
    MaintenanceHandle { tx }
}
