pub mod health_port;
pub mod notifier_port;
pub mod process_port;
pub mod state_port;

pub use health_port::{HealthProbe, PortProbe};
pub use notifier_port::FatalNotifier;
pub use process_port::{
    BackendChild, ExitInfo, LaunchError, LaunchSpec, OutputSink, ProcessLauncher,
};
pub use state_port::StateStore;
