pub mod adapters;
pub mod app;
pub mod domain;
pub mod ports;
pub mod stream;
pub mod telemetry;

use adapters::boundary::load_whitelist;
use adapters::session::FileSessionStore;
use adapters::supervisor::state_file::write_atomic;
use adapters::supervisor::{
    FileStateStore, HttpHealthProbe, TcpPortProbe, TokioProcessLauncher, TracingFatalNotifier,
};
use adapters::terminal::ShellSpawner;
use adapters::transport::HttpBackendTransport;
use anyhow::Context;
use app::boundary::{
    spawn_maintenance_task, AuditTrail, BoundaryConfig, ChannelValidator, MaintenanceHandle,
    RateLimiter,
};
use app::breaker::{BreakerRegistry, ErrorBoundary, RetryConfig};
use app::invoke::{
    spawn_connection_monitor, spawn_queue_drainer, DrainerHandle, InvokeFailure, InvokeOptions,
    InvokeResponse, InvokeService, MessageQueue, QueueConfig, SystemHandler,
};
use app::session::{SessionBus, SessionConfig, SessionService};
use app::supervisor::{BackendSupervisor, SupervisorConfig, SupervisorPorts};
use app::terminal::{TerminalId, TerminalSessions, DEFAULT_MAX_TERMINALS};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use domain::boundary::{ChannelCategory, CorrelationId};
use domain::breaker::BreakerConfig;
use domain::session::InstanceId;
use domain::supervisor::BackendProcessRecord;
use futures::{Stream, StreamExt};
use ports::transport::BackendTransport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telemetry::HostMetrics;
use tokio::fs;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DISCOVERY_FILE: &str = "discovery.json";
pub const SESSION_FILE: &str = "session.json";
pub const SESSION_BACKUP_FILE: &str = "session.backup.json";
const DEFAULT_AUDIT_LIMIT: usize = 100;
const STATUS_LOG_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub state_dir: PathBuf,
    pub whitelist_path: Option<PathBuf>,
    pub otlp_endpoint: Option<String>,
    pub shell: Option<String>,
    pub max_terminals: usize,
    pub boundary: BoundaryConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub supervisor: SupervisorConfig,
    pub queue: QueueConfig,
    pub session: SessionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 17817)),
            state_dir: default_state_dir(),
            whitelist_path: None,
            otlp_endpoint: None,
            shell: None,
            max_terminals: DEFAULT_MAX_TERMINALS,
            boundary: BoundaryConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            supervisor: SupervisorConfig::default(),
            queue: QueueConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Per-user application data directory, `state` in the working directory
/// when the platform has none.
pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("bastion"))
        .unwrap_or_else(|| PathBuf::from("state"))
}

#[derive(Clone)]
struct AppState {
    invoke: Arc<InvokeService>,
    supervisor: Arc<BackendSupervisor>,
    breakers: Arc<BreakerRegistry>,
    system: Arc<SystemHandler>,
    terminals: Arc<TerminalSessions>,
    sessions: Arc<SessionService>,
    state_dir: PathBuf,
    started_at: Instant,
    metrics: Option<Arc<HostMetrics>>,
}

impl AppState {
    fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Every long-lived component, wired but not yet started.
struct Host {
    state: AppState,
    queue: Arc<MessageQueue>,
    maintenance: MaintenanceHandle,
    drainer: DrainerHandle,
    connection_task: JoinHandle<()>,
}

impl Host {
    fn build(settings: &Settings, metrics: Option<Arc<HostMetrics>>) -> anyhow::Result<Self> {
        let whitelist = Arc::new(load_whitelist(settings.whitelist_path.as_deref())?);
        let limiter = Arc::new(RateLimiter::new(settings.boundary.rate_cleanup_threshold));
        let audit = Arc::new(AuditTrail::new(
            settings.boundary.audit_capacity,
            settings.boundary.audit_retention,
        ));
        let validator = Arc::new(ChannelValidator::new(
            whitelist,
            limiter.clone(),
            audit.clone(),
            metrics.clone(),
        ));
        let maintenance =
            spawn_maintenance_task(limiter, audit, settings.boundary.maintenance_interval);

        let breakers = Arc::new(BreakerRegistry::new(
            settings.breaker.clone(),
            metrics.clone(),
        ));
        let boundary = Arc::new(ErrorBoundary::new(
            breakers.clone(),
            settings.retry.clone(),
            metrics.clone(),
        ));

        let supervisor_ports = SupervisorPorts {
            launcher: Arc::new(TokioProcessLauncher::new()),
            health: Arc::new(HttpHealthProbe::new(None).context("building health probe")?),
            ports: Arc::new(TcpPortProbe),
            state: Arc::new(FileStateStore::new(&settings.state_dir)),
            notifier: Arc::new(TracingFatalNotifier::new(Some(settings.state_dir.clone()))),
        };
        let supervisor = BackendSupervisor::new(
            settings.supervisor.clone(),
            supervisor_ports,
            metrics.clone(),
        );
        let (connection, connection_task) =
            spawn_connection_monitor(supervisor.subscribe(), breakers.clone());

        let transport: Arc<dyn BackendTransport> = Arc::new(
            HttpBackendTransport::new(supervisor.subscribe())
                .context("building backend transport")?,
        );
        let queue = Arc::new(MessageQueue::new(settings.queue.clone()));
        let drainer = spawn_queue_drainer(
            queue.clone(),
            boundary.clone(),
            transport.clone(),
            connection.clone(),
        );

        let sessions = SessionService::start(
            settings.session.clone(),
            InstanceId::new(),
            Arc::new(FileSessionStore::new(
                "primary",
                settings.state_dir.join(SESSION_FILE),
            )),
            Arc::new(FileSessionStore::new(
                "backup",
                settings.state_dir.join(SESSION_BACKUP_FILE),
            )),
            SessionBus::new(),
        );
        let terminals = Arc::new(TerminalSessions::new(
            Arc::new(ShellSpawner::new(settings.shell.clone())),
            settings.max_terminals,
        ));
        let system = Arc::new(SystemHandler::new(
            supervisor.subscribe(),
            connection.clone(),
            breakers.clone(),
        ));

        let invoke = InvokeService::new(
            validator,
            boundary,
            transport,
            queue.clone(),
            connection,
            metrics.clone(),
        )
        .with_handler(ChannelCategory::System, system.clone())
        .with_handler(ChannelCategory::Terminal, terminals.clone())
        .with_handler(ChannelCategory::Session, sessions.clone());

        Ok(Self {
            state: AppState {
                invoke: Arc::new(invoke),
                supervisor,
                breakers,
                system,
                terminals,
                sessions,
                state_dir: settings.state_dir.clone(),
                started_at: Instant::now(),
                metrics,
            },
            queue,
            maintenance,
            drainer,
            connection_task,
        })
    }

    /// Backend first so nothing new reaches it, then whatever is still
    /// queued fails, then session state goes to disk.
    async fn shutdown(self) {
        self.state.supervisor.shutdown().await;
        self.drainer.shutdown().await;
        self.queue.close();
        self.state.terminals.shutdown().await;
        self.state.sessions.shutdown().await;
        self.maintenance.shutdown().await;
        self.connection_task.abort();
    }
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    run_until(settings, shutdown_signal()).await
}

/// Runs the daemon until `shutdown` resolves, then stops it gracefully.
pub async fn run_until<F>(settings: Settings, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (metrics, provider) = if let Some(ref endpoint) = settings.otlp_endpoint {
        let (provider, metrics) =
            telemetry::init_metrics(Some(endpoint.clone()), "bastion-hostd")?;
        (Some(Arc::new(metrics)), Some(provider))
    } else {
        (None, None)
    };

    fs::create_dir_all(&settings.state_dir)
        .await
        .with_context(|| format!("creating state dir {}", settings.state_dir.display()))?;

    let host = Host::build(&settings, metrics)?;
    match host.state.sessions.recover().await {
        Ok(Some(session)) => info!(session = session.session_id.as_str(), "session recovered"),
        Ok(None) => debug!("no session to recover"),
        Err(err) => warn!(%err, "session recovery failed; starting without one"),
    }

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    let listen = listener.local_addr()?;

    let supervisor = host.state.supervisor.clone();
    let startup = tokio::spawn(async move {
        if let Err(err) = supervisor.start().await {
            error!(%err, "backend did not start; boundary calls to it will fail");
        }
    });
    let discovery = spawn_discovery_writer(
        listen,
        settings.state_dir.clone(),
        host.state.supervisor.subscribe(),
    );

    let app = router(host.state.clone());
    info!(
        "listening" = %listen,
        "state_dir" = %settings.state_dir.display(),
        "msg" = "bastion-hostd started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("msg" = "stopping bastion-hostd");
    startup.abort();
    let _ = startup.await;
    discovery.abort();
    host.shutdown().await;
    if let Err(err) = remove_discovery_file(&settings.state_dir).await {
        warn!(%err, "failed to remove discovery file");
    }

    if let Some(provider) = provider {
        if let Err(e) = telemetry::shutdown_metrics(provider) {
            warn!("Failed to shutdown telemetry: {}", e);
        }
    }

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/status", get(status))
        .route("/invoke", post(invoke))
        .route("/terminal/:id/stream", get(terminal_stream))
        .route("/debug/whitelist", get(debug_whitelist))
        .route("/debug/audit", get(debug_audit))
        .route("/debug/rate-limits", get(debug_rate_limits))
        .route("/debug/breakers", get(debug_breakers))
        .with_state(state)
}

async fn shutdown_signal() {
    let _ = ctrl_c().await;
    info!("msg" = "shutdown signal received");
}

#[derive(Debug, Serialize)]
struct DiscoveryDocument {
    version: u32,
    build: &'static str,
    generated_at: String,
    pid: u32,
    listen: String,
    backend_port: Option<u16>,
    state_dir: String,
}

/// Keeps `discovery.json` current: written once at start and again whenever
/// the backend moves to a different port.
fn spawn_discovery_writer(
    listen: SocketAddr,
    state_dir: PathBuf,
    mut backend: watch::Receiver<BackendProcessRecord>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut written: Option<Option<u16>> = None;
        loop {
            let port = backend.borrow_and_update().port;
            if written != Some(port) {
                match write_discovery_file(listen, &state_dir, port).await {
                    Ok(()) => written = Some(port),
                    Err(err) => warn!(%err, "failed to write discovery file"),
                }
            }
            if backend.changed().await.is_err() {
                break;
            }
        }
    })
}

async fn write_discovery_file(
    listen: SocketAddr,
    state_dir: &Path,
    backend_port: Option<u16>,
) -> anyhow::Result<()> {
    let document = DiscoveryDocument {
        version: 1,
        build: env!("CARGO_PKG_VERSION"),
        generated_at: Utc::now().to_rfc3339(),
        pid: std::process::id(),
        listen: listen.to_string(),
        backend_port,
        state_dir: state_dir.to_string_lossy().into_owned(),
    };
    let json = serde_json::to_vec_pretty(&document)?;
    write_atomic(&state_dir.join(DISCOVERY_FILE), &json).await?;
    debug!(?backend_port, "discovery file written");
    Ok(())
}

async fn remove_discovery_file(state_dir: &Path) -> anyhow::Result<()> {
    match fs::remove_file(state_dir.join(DISCOVERY_FILE)).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    uptime_ms: u128,
    system: Value,
    queued_calls: usize,
    terminals: usize,
    terminal_streams: usize,
    session: Option<Value>,
    recent_backend_logs: Vec<String>,
    state_dir: String,
    telemetry_ready: bool,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let session = state.sessions.info().map(|session| {
        json!({
            "session_id": session.session_id,
            "expires_at": session.expires_at,
            "keys": session.data.len(),
        })
    });
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_ms: state.uptime().as_millis(),
        system: state.system.status(),
        queued_calls: state.invoke.queued(),
        terminals: state.terminals.list().await.len(),
        terminal_streams: state.terminals.output_subscribers(),
        session,
        recent_backend_logs: state.supervisor.logs().tail_text(STATUS_LOG_LINES),
        state_dir: state.state_dir.to_string_lossy().into_owned(),
        telemetry_ready: state.metrics.is_some(),
    })
}

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    channel: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    options: InvokeOptions,
}

async fn invoke(
    State(state): State<AppState>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<InvokeResponse>, ApiError> {
    state
        .invoke
        .invoke(&request.channel, request.payload, request.options)
        .await
        .map(Json)
        .map_err(ApiError::from)
}

/// Server-sent `output` events carrying one terminal's chunks. The
/// subscription ends when the client disconnects.
async fn terminal_stream(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let id = TerminalId::from_string(id);
    let output = state
        .terminals
        .output(&id)
        .await
        .map_err(|err| ApiError::not_found(err.to_string()))?;
    debug!(terminal = %id, "terminal output stream attached");
    let events = output.map(|chunk| Event::default().event("output").json_data(chunk));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn debug_whitelist(State(state): State<AppState>) -> Json<Value> {
    let whitelist = state.invoke.validator().whitelist();
    Json(json!({
        "defaults": whitelist.defaults(),
        "channels": whitelist.policies(),
    }))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn debug_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Value> {
    let audit = state.invoke.validator().audit();
    let events = audit.recent(query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT));
    Json(json!({
        "total": audit.len(),
        "events": events,
    }))
}

async fn debug_rate_limits(State(state): State<AppState>) -> Json<Value> {
    let occupancy = state
        .invoke
        .validator()
        .limiter()
        .occupancy(Instant::now());
    Json(json!({ "channels": occupancy }))
}

async fn debug_breakers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "breakers": state.breakers.snapshots() }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                code: "NOT_FOUND",
                message,
                correlation_id: None,
                detail: None,
            },
        }
    }
}

impl From<InvokeFailure> for ApiError {
    fn from(failure: InvokeFailure) -> Self {
        let status = match failure.error.code() {
            "CHANNEL_REJECTED" => StatusCode::FORBIDDEN,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "SIZE_EXCEEDED" => StatusCode::PAYLOAD_TOO_LARGE,
            "CIRCUIT_OPEN" => StatusCode::SERVICE_UNAVAILABLE,
            "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            "BACKEND_ERROR" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                code: failure.error.code(),
                message: failure.error.to_string(),
                detail: serde_json::to_value(&failure.error).ok(),
                correlation_id: Some(failure.correlation_id),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        let body = Json(self.body);
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_settings(temp: &TempDir) -> Settings {
        Settings {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            state_dir: temp.path().to_path_buf(),
            ..Settings::default()
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_invoke(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/invoke")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_uri(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn read_json(path: &Path) -> Option<Value> {
        let raw = fs::read(path).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        let (status, body) = send(&app, get_uri("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn invoke_answers_system_ping() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        let (status, body) = send(
            &app,
            post_invoke(json!({
                "channel": "system:ping",
                "options": { "correlation_id": "ui-42" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correlation_id"], "ui-42");
        assert_eq!(body["result"]["pong"], true);
        assert_eq!(body["fallback"], false);
    }

    #[tokio::test]
    async fn invoke_maps_rejections_to_http_status() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        let (status, body) = send(
            &app,
            post_invoke(json!({ "channel": "fs:read", "payload": { "path": "/etc" } })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "CHANNEL_REJECTED");
        assert!(body["correlation_id"].as_str().is_some());

        let (status, body) = send(
            &app,
            post_invoke(json!({ "channel": "system:ping", "payload": "x".repeat(2048) })),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["detail"]["limit"], 1024);
    }

    #[tokio::test]
    async fn session_channels_round_trip_through_invoke() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        let (status, _) = send(
            &app,
            post_invoke(json!({
                "channel": "session:set",
                "payload": { "key": "theme", "value": "dark" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(
            &app,
            post_invoke(json!({ "channel": "session:get", "payload": { "key": "theme" } })),
        )
        .await;
        assert_eq!(body["result"]["value"], "dark");

        host.shutdown().await;
        assert!(temp.path().join(SESSION_FILE).exists());
        assert!(temp.path().join(SESSION_BACKUP_FILE).exists());
    }

    #[tokio::test]
    async fn debug_surface_reflects_boundary_activity() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        send(&app, post_invoke(json!({ "channel": "system:ping" }))).await;
        send(&app, post_invoke(json!({ "channel": "nope:nope" }))).await;

        let (_, whitelist) = send(&app, get_uri("/debug/whitelist")).await;
        let patterns: Vec<&str> = whitelist["channels"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["pattern"].as_str())
            .collect();
        assert!(patterns.contains(&"task:*"));

        let (_, audit) = send(&app, get_uri("/debug/audit?limit=1")).await;
        assert_eq!(audit["total"], 2);
        assert_eq!(audit["events"].as_array().unwrap().len(), 1);
        assert_eq!(audit["events"][0]["outcome"], "REJECTED");

        let (_, rates) = send(&app, get_uri("/debug/rate-limits")).await;
        assert_eq!(rates["channels"][0]["channel"], "system:ping");
        assert_eq!(rates["channels"][0]["calls_in_window"], 1);

        let (_, breakers) = send(&app, get_uri("/debug/breakers")).await;
        assert!(breakers["breakers"].is_array());
    }

    #[tokio::test]
    async fn terminal_stream_for_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        let (status, body) = send(&app, get_uri("/terminal/missing/stream")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminal_output_streams_as_server_sent_events() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        let (status, created) =
            send(&app, post_invoke(json!({ "channel": "terminal:create" }))).await;
        assert_eq!(status, StatusCode::OK, "body: {created}");
        let id = created["result"]["terminal_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get_uri(&format!("/terminal/{id}/stream")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        assert_eq!(host.state.terminals.output_subscribers(), 1);

        let (status, _) = send(
            &app,
            post_invoke(json!({
                "channel": "terminal:write",
                "payload": { "terminal_id": id, "data": "echo streamed-output\n" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let mut seen = String::new();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(Ok(frame)) = body.next().await {
                seen.push_str(&String::from_utf8_lossy(&frame));
                if seen.contains("streamed-output") {
                    break;
                }
            }
        })
        .await
        .expect("terminal output streamed");
        assert!(seen.contains("event: output"));

        drop(body);
        assert_eq!(host.state.terminals.output_subscribers(), 0);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn status_reports_backend_and_connection() {
        let temp = TempDir::new().unwrap();
        let host = Host::build(&test_settings(&temp), None).unwrap();
        let app = router(host.state.clone());
        let (status, body) = send(&app, get_uri("/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["system"]["backend"]["state"], "NOT_STARTED");
        assert_eq!(body["system"]["connection"], "DISCONNECTED");
        assert_eq!(body["queued_calls"], 0);
        assert_eq!(body["telemetry_ready"], false);
    }

    #[tokio::test]
    async fn discovery_file_tracks_backend_port() {
        let temp = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(BackendProcessRecord::default());
        let listen = SocketAddr::from(([127, 0, 0, 1], 17999));
        let task = spawn_discovery_writer(listen, temp.path().to_path_buf(), rx);
        let path = temp.path().join(DISCOVERY_FILE);

        let mut doc = None;
        for _ in 0..50 {
            doc = read_json(&path).await;
            if doc.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let doc = doc.expect("discovery written");
        assert_eq!(doc["listen"], "127.0.0.1:17999");
        assert!(doc["backend_port"].is_null());

        tx.send_modify(|record| record.port = Some(8123));
        let mut moved = false;
        for _ in 0..50 {
            if read_json(&path)
                .await
                .is_some_and(|doc| doc["backend_port"] == 8123)
            {
                moved = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(moved);

        task.abort();
        remove_discovery_file(temp.path()).await.unwrap();
        assert!(!path.exists());
        remove_discovery_file(temp.path()).await.unwrap();
    }
}
