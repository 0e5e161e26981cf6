use bastion_hostd::{default_state_dir, run, Settings};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bastion host supervisor daemon", long_about = None)]
struct Cli {
    #[arg(
        long,
        env = "BASTION_LISTEN",
        default_value = "127.0.0.1:17817",
        help = "Listen address for the boundary and debug endpoints"
    )]
    listen: SocketAddr,

    #[arg(
        long,
        env = "BASTION_STATE_DIR",
        value_name = "DIR",
        help = "Directory for backend state, session files and discovery.json"
    )]
    state_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "BASTION_WHITELIST",
        value_name = "PATH",
        help = "JSON channel whitelist replacing the built-in channels"
    )]
    whitelist: Option<PathBuf>,

    #[arg(
        long,
        env = "BASTION_BACKEND_ENTRYPOINT",
        default_value = "backend/main.py",
        help = "Script passed to the backend runtime"
    )]
    backend_entrypoint: String,

    #[arg(
        long,
        env = "BASTION_BACKEND_DIR",
        value_name = "DIR",
        help = "Working directory for the backend process"
    )]
    backend_dir: Option<PathBuf>,

    #[arg(
        long = "runtime",
        env = "BASTION_RUNTIMES",
        value_delimiter = ',',
        default_value = "python3,python,py",
        help = "Runtime commands tried in order when spawning the backend"
    )]
    runtimes: Vec<String>,

    #[arg(
        long,
        env = "BASTION_BACKEND_PORT",
        default_value_t = 8100,
        help = "Preferred backend port"
    )]
    backend_port: u16,

    #[arg(
        long,
        env = "BASTION_APP_ENV",
        default_value = "production",
        help = "APP_ENV passed to the backend"
    )]
    app_env: String,

    #[arg(
        long,
        env = "BASTION_STARTUP_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "How long the backend has to answer its health endpoint"
    )]
    startup_timeout_ms: u64,

    #[arg(
        long,
        env = "BASTION_SHELL",
        help = "Shell used for terminal sessions (defaults to sh or cmd.exe)"
    )]
    shell: Option<String>,

    #[arg(
        long,
        env = "BASTION_OTLP_ENDPOINT",
        help = "OTLP endpoint for metrics (e.g., http://localhost:4318)"
    )]
    otlp_endpoint: Option<String>,
}

impl Cli {
    fn into_settings(self) -> Settings {
        let mut settings = Settings {
            listen: self.listen,
            state_dir: self.state_dir.unwrap_or_else(default_state_dir),
            whitelist_path: self.whitelist,
            otlp_endpoint: self.otlp_endpoint,
            shell: self.shell,
            ..Settings::default()
        };
        let supervisor = &mut settings.supervisor;
        supervisor.entrypoint = self.backend_entrypoint;
        supervisor.working_dir = self.backend_dir;
        supervisor.runtime_commands = self.runtimes;
        supervisor.preferred_port = self.backend_port;
        supervisor.app_env = self.app_env;
        supervisor.startup_timeout = Duration::from_millis(self.startup_timeout_ms);
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    run(cli.into_settings()).await
}
