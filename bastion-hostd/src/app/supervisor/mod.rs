pub mod log_buffer;
pub mod port_discovery;
pub mod restart;
pub mod service;

pub use log_buffer::{BackendLogBuffer, BACKEND_LOG_TARGET};
pub use port_discovery::{discover_port, PortChoice, PortStrategy};
pub use restart::RestartWindow;
pub use service::{BackendSupervisor, SupervisorError, SupervisorPorts};

use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Runtimes tried in order until one launches.
    pub runtime_commands: Vec<String>,
    pub entrypoint: String,
    pub working_dir: Option<PathBuf>,
    pub app_env: String,
    pub preferred_port: u16,
    /// Ports after the preferred one scanned before asking the OS.
    pub port_scan_span: u16,
    pub startup_timeout: Duration,
    pub startup_poll_interval: Duration,
    pub health_interval: Duration,
    pub restart_delay: Duration,
    pub shutdown_grace: Duration,
    pub max_restarts: u32,
    pub restart_window: Duration,
    pub log_buffer_lines: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            runtime_commands: vec!["python3".into(), "python".into(), "py".into()],
            entrypoint: "backend/main.py".into(),
            working_dir: None,
            app_env: "production".into(),
            preferred_port: 8100,
            port_scan_span: 100,
            startup_timeout: Duration::from_secs(30),
            startup_poll_interval: Duration::from_millis(500),
            health_interval: Duration::from_secs(10),
            restart_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            max_restarts: 3,
            restart_window: Duration::from_secs(300),
            log_buffer_lines: 500,
        }
    }
}
