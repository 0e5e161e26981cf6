pub mod health;
pub mod notifier;
pub mod process;
pub mod state_file;

pub use health::{HttpHealthProbe, TcpPortProbe};
pub use notifier::TracingFatalNotifier;
pub use process::TokioProcessLauncher;
pub use state_file::FileStateStore;
