use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendState {
    NotStarted,
    Starting,
    Healthy,
    Unhealthy,
    Stopping,
    Stopped,
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::NotStarted => "NOT_STARTED",
            BackendState::Starting => "STARTING",
            BackendState::Healthy => "HEALTHY",
            BackendState::Unhealthy => "UNHEALTHY",
            BackendState::Stopping => "STOPPING",
            BackendState::Stopped => "STOPPED",
        }
    }

    pub fn can_transition_to(self, next: BackendState) -> bool {
        use BackendState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (NotStarted, Healthy)
                | (NotStarted, Stopping)
                | (NotStarted, Stopped)
                | (Starting, Healthy)
                | (Starting, Unhealthy)
                | (Starting, Stopping)
                | (Starting, Stopped)
                | (Healthy, Unhealthy)
                | (Healthy, Starting)
                | (Healthy, Stopping)
                | (Unhealthy, Healthy)
                | (Unhealthy, Starting)
                | (Unhealthy, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Starting)
        )
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            BackendState::Starting | BackendState::Healthy | BackendState::Unhealthy
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub from: BackendState,
    pub to: BackendState,
}

/// What the supervisor knows about the backend it manages. Persisted so a
/// restarted supervisor can reattach instead of spawning a second copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendProcessRecord {
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub state: BackendState,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
    /// Set when the process was found running rather than spawned by us.
    #[serde(default)]
    pub adopted: bool,
}

impl Default for BackendProcessRecord {
    fn default() -> Self {
        Self {
            pid: None,
            port: None,
            state: BackendState::NotStarted,
            started_at: None,
            last_health_check_at: None,
            restart_count: 0,
            adopted: false,
        }
    }
}

impl BackendProcessRecord {
    pub fn transition(&mut self, next: BackendState) -> Result<StateChange, String> {
        if self.state == next {
            return Ok(StateChange {
                from: next,
                to: next,
            });
        }
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "backend cannot move from {} to {}",
                self.state.as_str(),
                next.as_str()
            ));
        }
        let change = StateChange {
            from: self.state,
            to: next,
        };
        self.state = next;
        Ok(change)
    }

    pub fn begin_start(&mut self, port: u16) -> Result<StateChange, String> {
        let change = self.transition(BackendState::Starting)?;
        self.port = Some(port);
        self.pid = None;
        self.adopted = false;
        self.started_at = Some(Utc::now());
        Ok(change)
    }

    pub fn attach_pid(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub fn adopt(&mut self, port: u16, pid: Option<u32>) -> Result<StateChange, String> {
        let change = self.transition(BackendState::Healthy)?;
        self.port = Some(port);
        self.pid = pid;
        self.adopted = true;
        self.last_health_check_at = Some(Utc::now());
        Ok(change)
    }

    pub fn record_probe(&mut self, healthy: bool) -> Result<StateChange, String> {
        self.last_health_check_at = Some(Utc::now());
        let next = if healthy {
            BackendState::Healthy
        } else {
            BackendState::Unhealthy
        };
        self.transition(next)
    }

    pub fn begin_restart(&mut self) -> Result<StateChange, String> {
        let port = self
            .port
            .ok_or_else(|| "restart requested without a known port".to_string())?;
        let change = self.begin_start(port)?;
        self.restart_count = self.restart_count.saturating_add(1);
        Ok(change)
    }
}
