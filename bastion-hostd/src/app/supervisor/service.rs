use super::log_buffer::BackendLogBuffer;
use super::port_discovery::discover_port;
use super::restart::RestartWindow;
use super::SupervisorConfig;
use crate::domain::supervisor::{
    BackendProcessRecord, BackendState, FatalReason, FatalReport, LaunchAttempt, StateChange,
};
use crate::ports::supervisor::{
    BackendChild, FatalNotifier, HealthProbe, LaunchSpec, OutputSink, PortProbe, ProcessLauncher,
    StateStore,
};
use crate::telemetry::HostMetrics;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const FATAL_LOG_TAIL: usize = 50;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend is already running")]
    AlreadyRunning,
    #[error("no usable backend port: {0}")]
    PortUnavailable(String),
    #[error("no runtime command could launch ({attempts} attempts, report {correlation_id})")]
    SpawnExhausted {
        attempts: usize,
        correlation_id: String,
    },
    #[error("backend not healthy after {} ms (report {correlation_id})", timeout.as_millis())]
    StartupTimeout {
        timeout: std::time::Duration,
        correlation_id: String,
    },
}

/// Collaborators the supervisor drives.
#[derive(Clone)]
pub struct SupervisorPorts {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub health: Arc<dyn HealthProbe>,
    pub ports: Arc<dyn PortProbe>,
    pub state: Arc<dyn StateStore>,
    pub notifier: Arc<dyn FatalNotifier>,
}

struct MonitorHandle {
    tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

enum StartupResult {
    Healthy,
    Exited(String),
    TimedOut,
}

/// Owns the backend process: finds it a port, launches it, watches its
/// health and restarts it in place when it stops answering.
pub struct BackendSupervisor {
    config: SupervisorConfig,
    ports: SupervisorPorts,
    logs: Arc<BackendLogBuffer>,
    metrics: Option<Arc<HostMetrics>>,
    record_tx: watch::Sender<BackendProcessRecord>,
    child: Mutex<Option<Box<dyn BackendChild>>>,
    restarts: parking_lot::Mutex<RestartWindow>,
    monitor: parking_lot::Mutex<Option<MonitorHandle>>,
}

impl BackendSupervisor {
    pub fn new(
        config: SupervisorConfig,
        ports: SupervisorPorts,
        metrics: Option<Arc<HostMetrics>>,
    ) -> Arc<Self> {
        let (record_tx, _) = watch::channel(BackendProcessRecord::default());
        Arc::new(Self {
            logs: Arc::new(BackendLogBuffer::new(config.log_buffer_lines)),
            restarts: parking_lot::Mutex::new(RestartWindow::new(
                config.max_restarts,
                config.restart_window,
            )),
            config,
            ports,
            metrics,
            record_tx,
            child: Mutex::new(None),
            monitor: parking_lot::Mutex::new(None),
        })
    }

    pub fn record(&self) -> BackendProcessRecord {
        self.record_tx.borrow().clone()
    }

    /// Every record change, including the final `STOPPED` on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<BackendProcessRecord> {
        self.record_tx.subscribe()
    }

    pub fn logs(&self) -> &Arc<BackendLogBuffer> {
        &self.logs
    }

    pub async fn start(self: &Arc<Self>) -> Result<BackendProcessRecord, SupervisorError> {
        if self.record().state.is_running() {
            return Err(SupervisorError::AlreadyRunning);
        }

        if self.try_reattach().await {
            self.spawn_monitor();
            return Ok(self.record());
        }

        let choice = match discover_port(
            self.ports.ports.as_ref(),
            self.config.preferred_port,
            self.config.port_scan_span,
        )
        .await
        {
            Ok(choice) => choice,
            Err(err) => {
                let report = FatalReport::new(
                    FatalReason::PortUnavailable,
                    format!("no free port near {}: {err}", self.config.preferred_port),
                    Vec::new(),
                    self.logs.tail_text(FATAL_LOG_TAIL),
                );
                self.ports.notifier.notify(&report).await;
                return Err(SupervisorError::PortUnavailable(err.to_string()));
            }
        };
        info!(port = choice.port, strategy = ?choice.strategy, "backend port selected");

        let mut attempts = Vec::new();
        let Some(launched) = self.launch_any(choice.port, &mut attempts).await else {
            let report = FatalReport::new(
                FatalReason::SpawnExhausted,
                format!(
                    "no runtime command could launch {}",
                    self.config.entrypoint
                ),
                attempts,
                self.logs.tail_text(FATAL_LOG_TAIL),
            );
            self.ports.notifier.notify(&report).await;
            self.update(|record| record.transition(BackendState::Stopped))
                .await;
            return Err(SupervisorError::SpawnExhausted {
                attempts: report.attempts.len(),
                correlation_id: report.correlation_id.to_string(),
            });
        };
        let port = self.install_child(launched).await;

        match self.await_startup(port).await {
            StartupResult::Healthy => {
                self.update(|record| record.record_probe(true)).await;
                info!(port, attempts = attempts.len() + 1, "backend healthy");
                self.spawn_monitor();
                Ok(self.record())
            }
            failed => {
                self.stop_child().await;
                self.update(|record| record.transition(BackendState::Stopped))
                    .await;
                let message = match failed {
                    StartupResult::Exited(exit) => format!("backend exited during startup: {exit}"),
                    _ => format!(
                        "backend did not answer /health within {} ms",
                        self.config.startup_timeout.as_millis()
                    ),
                };
                let report = FatalReport::new(
                    FatalReason::StartupTimeout,
                    message,
                    attempts,
                    self.logs.tail_text(FATAL_LOG_TAIL),
                );
                self.ports.notifier.notify(&report).await;
                Err(SupervisorError::StartupTimeout {
                    timeout: self.config.startup_timeout,
                    correlation_id: report.correlation_id.to_string(),
                })
            }
        }
    }

    /// Stops the backend: SIGTERM, a grace period, then a hard kill. Always
    /// publishes the final record and removes the persisted state.
    pub async fn shutdown(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            let _ = monitor.tx.send(()).await;
            let _ = monitor.task.await;
        }

        if self.record().state != BackendState::Stopped {
            self.update(|record| record.transition(BackendState::Stopping))
                .await;
            self.stop_child().await;
            self.update(|record| record.transition(BackendState::Stopped))
                .await;
        }
        self.record_tx.send_modify(|record| record.pid = None);
        if let Err(err) = self.ports.state.clear().await {
            warn!(%err, "failed to remove backend state file");
        }
        info!("backend supervisor stopped");
    }

    /// One steady-state health check. Public so callers can force a check
    /// outside the timer.
    pub async fn check_health(&self) {
        let Some(port) = self.record().port else {
            return;
        };

        let exited = {
            let mut slot = self.child.lock().await;
            slot.as_mut().and_then(|child| child.try_wait().ok().flatten())
        };
        if let Some(exit) = exited {
            warn!(port, %exit, "backend exited unexpectedly");
            self.restart_in_place(port, "exit").await;
            return;
        }

        if self.ports.health.probe(port).await {
            self.update(|record| record.record_probe(true)).await;
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_health_failure(port);
        }
        warn!(port, "backend health probe failed");
        self.restart_in_place(port, "health").await;
    }

    async fn try_reattach(&self) -> bool {
        let persisted = match self.ports.state.load().await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(err) => {
                warn!(%err, "ignoring unreadable backend state");
                return false;
            }
        };
        let Some(port) = persisted.port else {
            return false;
        };
        // A healthy answer is taken as proof the backend is ours.
        if !self.ports.health.probe(port).await {
            info!(port, "recorded backend is gone; starting fresh");
            if let Err(err) = self.ports.state.clear().await {
                warn!(%err, "failed to clear stale backend state");
            }
            return false;
        }
        info!(port, pid = ?persisted.pid, "reattached to running backend");
        self.update(|record| record.adopt(port, persisted.pid)).await;
        true
    }

    /// Tries each runtime command in order. Failures are appended to
    /// `attempts`.
    async fn launch_any(
        &self,
        mut port: u16,
        attempts: &mut Vec<LaunchAttempt>,
    ) -> Option<(Box<dyn BackendChild>, u16)> {
        for program in &self.config.runtime_commands {
            if !self.ports.ports.is_free(port).await {
                match self.ports.ports.ephemeral().await {
                    Ok(fresh) => {
                        debug!(old = port, new = fresh, "port taken before spawn; moving");
                        port = fresh;
                    }
                    Err(err) => warn!(port, %err, "port taken and no ephemeral port available"),
                }
            }
            let spec = self.launch_spec(program, port);
            let sink: Arc<dyn OutputSink> = self.logs.clone();
            match self.ports.launcher.launch(&spec, sink).await {
                Ok(child) => {
                    info!(
                        command = %spec.display_command(),
                        pid = ?child.pid(),
                        "backend launched"
                    );
                    return Some((child, port));
                }
                Err(err) => {
                    warn!(command = %spec.display_command(), %err, "backend launch failed");
                    attempts.push(LaunchAttempt {
                        command: spec.display_command(),
                        port,
                        error: err.to_string(),
                    });
                }
            }
        }
        None
    }

    async fn install_child(&self, (child, port): (Box<dyn BackendChild>, u16)) -> u16 {
        let pid = child.pid();
        *self.child.lock().await = Some(child);
        self.update(|record| {
            let change = record.begin_start(port);
            record.attach_pid(pid);
            change
        })
        .await;
        port
    }

    fn launch_spec(&self, program: &str, port: u16) -> LaunchSpec {
        LaunchSpec {
            program: program.to_string(),
            args: vec![
                self.config.entrypoint.clone(),
                "--port".to_string(),
                port.to_string(),
            ],
            env: vec![
                ("APP_ENV".to_string(), self.config.app_env.clone()),
                ("PORT".to_string(), port.to_string()),
            ],
            working_dir: self.config.working_dir.clone(),
        }
    }

    async fn await_startup(&self, port: u16) -> StartupResult {
        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            let exited = {
                let mut slot = self.child.lock().await;
                slot.as_mut().and_then(|child| child.try_wait().ok().flatten())
            };
            if let Some(exit) = exited {
                return StartupResult::Exited(exit.to_string());
            }
            if self.ports.health.probe(port).await {
                return StartupResult::Healthy;
            }
            self.record_tx
                .send_modify(|record| record.last_health_check_at = Some(chrono::Utc::now()));
            if Instant::now() >= deadline {
                return StartupResult::TimedOut;
            }
            time::sleep(self.config.startup_poll_interval).await;
        }
    }

    async fn restart_in_place(&self, port: u16, reason: &'static str) {
        let allowed = self.restarts.lock().try_record(Instant::now());
        if !allowed {
            warn!(port, reason, "restart budget exhausted; backend unhealthy");
            self.update(|record| record.record_probe(false)).await;
            return;
        }

        info!(port, reason, "restarting backend in place");
        if let Some(metrics) = &self.metrics {
            metrics.record_backend_restart(reason);
        }
        self.stop_child().await;
        time::sleep(self.config.restart_delay).await;
        self.update(|record| record.begin_restart()).await;

        let mut attempts = Vec::new();
        let Some(launched) = self.launch_any(port, &mut attempts).await else {
            warn!(attempts = attempts.len(), "backend relaunch failed");
            self.update(|record| record.record_probe(false)).await;
            return;
        };
        let port = self.install_child(launched).await;

        match self.await_startup(port).await {
            StartupResult::Healthy => {
                self.update(|record| record.record_probe(true)).await;
                info!(port, "backend recovered after restart");
            }
            StartupResult::Exited(exit) => {
                warn!(port, %exit, "restarted backend exited");
                self.update(|record| record.record_probe(false)).await;
            }
            StartupResult::TimedOut => {
                warn!(port, "restarted backend never became healthy");
                self.update(|record| record.record_probe(false)).await;
            }
        }
    }

    async fn stop_child(&self) {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            self.stop_adopted().await;
            return;
        };

        if let Err(err) = child.terminate() {
            debug!(%err, "terminate request failed");
        }
        match time::timeout(self.config.shutdown_grace, child.wait()).await {
            Ok(Ok(exit)) => info!(%exit, "backend exited"),
            Ok(Err(err)) => warn!(%err, "failed waiting for backend exit"),
            Err(_) => {
                warn!(
                    grace_ms = self.config.shutdown_grace.as_millis() as u64,
                    "backend ignored terminate; killing"
                );
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to kill backend");
                }
            }
        }
    }

    /// Signals an adopted backend by its recorded pid, but only while that
    /// pid is alive and the recorded port still answers: a stale record may
    /// name an unrelated process.
    async fn stop_adopted(&self) {
        let record = self.record();
        let (true, Some(pid)) = (record.adopted, record.pid) else {
            return;
        };
        if !self.ports.launcher.is_running(pid).await {
            info!(pid, "adopted backend already gone");
            return;
        }
        let answering = match record.port {
            Some(port) => self.ports.health.probe(port).await,
            None => false,
        };
        if !answering {
            warn!(pid, port = ?record.port, "adopted backend not answering; leaving pid alone");
            return;
        }
        if let Err(err) = self.ports.launcher.terminate_pid(pid).await {
            warn!(pid, %err, "failed to stop adopted backend");
        }
    }

    /// Applies a record transition, logs it and persists the result.
    async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut BackendProcessRecord) -> Result<StateChange, String>,
    {
        let mut outcome = None;
        self.record_tx.send_modify(|record| outcome = Some(f(record)));
        match outcome {
            Some(Ok(change)) if change.from != change.to => {
                info!(
                    from = change.from.as_str(),
                    to = change.to.as_str(),
                    "backend state changed"
                );
            }
            Some(Err(err)) => warn!(%err, "ignored invalid backend transition"),
            _ => {}
        }

        let snapshot = self.record();
        let saved = match snapshot.state {
            BackendState::Stopping | BackendState::Stopped | BackendState::NotStarted => Ok(()),
            _ => self.ports.state.save(&snapshot).await,
        };
        if let Err(err) = saved {
            warn!(%err, "failed to persist backend state");
        }
    }

    fn spawn_monitor(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::channel(1);
        let this = Arc::clone(self);
        let interval = self.config.health_interval;
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = rx.recv() => {
                        debug!("backend health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => this.check_health().await,
                }
            }
        });
        if let Some(previous) = self.monitor.lock().replace(MonitorHandle { tx, task }) {
            previous.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::supervisor::{ExitInfo, LaunchError};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct ChildFlags {
        terminated: AtomicBool,
        killed: AtomicBool,
        crashed: AtomicBool,
    }

    struct FakeChild {
        pid: u32,
        flags: Arc<ChildFlags>,
    }

    #[async_trait]
    impl BackendChild for FakeChild {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
            let flags = &self.flags;
            let exited = flags.crashed.load(Ordering::SeqCst)
                || flags.terminated.load(Ordering::SeqCst)
                || flags.killed.load(Ordering::SeqCst);
            Ok(exited.then(|| ExitInfo {
                code: Some(1),
                signal: None,
            }))
        }

        async fn wait(&mut self) -> io::Result<ExitInfo> {
            loop {
                if let Some(exit) = self.try_wait()? {
                    return Ok(exit);
                }
                time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.flags.terminated.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn kill(&mut self) -> io::Result<()> {
            self.flags.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        missing: HashSet<String>,
        launches: AtomicUsize,
        children: SyncMutex<Vec<Arc<ChildFlags>>>,
        terminated_pids: SyncMutex<Vec<u32>>,
        dead_pids: HashSet<u32>,
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(
            &self,
            spec: &LaunchSpec,
            _output: Arc<dyn OutputSink>,
        ) -> Result<Box<dyn BackendChild>, LaunchError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.missing.contains(&spec.program) {
                return Err(LaunchError::NotFound(spec.program.clone()));
            }
            assert!(spec.env.contains(&("PORT".to_string(), spec.args[2].clone())));
            let flags = Arc::new(ChildFlags::default());
            let mut children = self.children.lock();
            children.push(flags.clone());
            Ok(Box::new(FakeChild {
                pid: 1000 + children.len() as u32,
                flags,
            }))
        }

        async fn terminate_pid(&self, pid: u32) -> io::Result<()> {
            self.terminated_pids.lock().push(pid);
            Ok(())
        }

        async fn is_running(&self, pid: u32) -> bool {
            !self.dead_pids.contains(&pid)
        }
    }

    /// Healthy unless `down` is set; `fail_next` forces that many failures.
    #[derive(Default)]
    struct FakeHealth {
        down: AtomicBool,
        fail_next: AtomicUsize,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for FakeHealth {
        async fn probe(&self, _port: u16) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return false;
            }
            !self.down.load(Ordering::SeqCst)
        }
    }

    struct AllFree;

    #[async_trait]
    impl PortProbe for AllFree {
        async fn is_free(&self, _port: u16) -> bool {
            true
        }

        async fn ephemeral(&self) -> io::Result<u16> {
            Ok(49152)
        }
    }

    #[derive(Default)]
    struct MemState {
        record: SyncMutex<Option<BackendProcessRecord>>,
    }

    #[async_trait]
    impl StateStore for MemState {
        async fn load(&self) -> anyhow::Result<Option<BackendProcessRecord>> {
            Ok(self.record.lock().clone())
        }

        async fn save(&self, record: &BackendProcessRecord) -> anyhow::Result<()> {
            *self.record.lock() = Some(record.clone());
            Ok(())
        }

        async fn clear(&self) -> anyhow::Result<()> {
            *self.record.lock() = None;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        reports: SyncMutex<Vec<FatalReport>>,
    }

    #[async_trait]
    impl FatalNotifier for RecordingNotifier {
        async fn notify(&self, report: &FatalReport) {
            self.reports.lock().push(report.clone());
        }
    }

    struct Fixture {
        supervisor: Arc<BackendSupervisor>,
        launcher: Arc<FakeLauncher>,
        health: Arc<FakeHealth>,
        state: Arc<MemState>,
        notifier: Arc<RecordingNotifier>,
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            runtime_commands: vec!["python3".into()],
            preferred_port: 8100,
            startup_timeout: Duration::from_secs(2),
            startup_poll_interval: Duration::from_millis(100),
            health_interval: Duration::from_secs(5),
            restart_delay: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(1),
            ..SupervisorConfig::default()
        }
    }

    fn fixture(config: SupervisorConfig, launcher: FakeLauncher) -> Fixture {
        let launcher = Arc::new(launcher);
        let health = Arc::new(FakeHealth::default());
        let state = Arc::new(MemState::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let supervisor = BackendSupervisor::new(
            config,
            SupervisorPorts {
                launcher: launcher.clone(),
                health: health.clone(),
                ports: Arc::new(AllFree),
                state: state.clone(),
                notifier: notifier.clone(),
            },
            Some(Arc::new(crate::telemetry::test_metrics())),
        );
        Fixture {
            supervisor,
            launcher,
            health,
            state,
            notifier,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reattaches_to_healthy_recorded_backend() {
        let f = fixture(config(), FakeLauncher::default());
        *f.state.record.lock() = Some(BackendProcessRecord {
            pid: Some(77),
            port: Some(8123),
            state: BackendState::Healthy,
            ..BackendProcessRecord::default()
        });

        let record = f.supervisor.start().await.unwrap();
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 0);
        assert!(record.adopted);
        assert_eq!(record.port, Some(8123));
        assert_eq!(record.state, BackendState::Healthy);

        f.supervisor.shutdown().await;
        assert_eq!(*f.launcher.terminated_pids.lock(), vec![77]);
    }

    fn adopted_fixture(launcher: FakeLauncher) -> Fixture {
        let f = fixture(config(), launcher);
        *f.state.record.lock() = Some(BackendProcessRecord {
            pid: Some(77),
            port: Some(8123),
            state: BackendState::Healthy,
            ..BackendProcessRecord::default()
        });
        f
    }

    #[tokio::test(start_paused = true)]
    async fn adopted_pid_is_left_alone_when_port_stops_answering() {
        let f = adopted_fixture(FakeLauncher::default());
        f.supervisor.start().await.unwrap();
        assert!(f.supervisor.record().adopted);

        f.health.down.store(true, Ordering::SeqCst);
        f.supervisor.shutdown().await;
        assert!(f.launcher.terminated_pids.lock().is_empty());
        assert_eq!(f.supervisor.record().state, BackendState::Stopped);
        assert!(f.state.record.lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_adopted_pid_is_not_signalled() {
        let f = adopted_fixture(FakeLauncher {
            dead_pids: [77].into_iter().collect(),
            ..FakeLauncher::default()
        });
        f.supervisor.start().await.unwrap();
        f.supervisor.shutdown().await;
        assert!(f.launcher.terminated_pids.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn falls_through_missing_runtimes() {
        let launcher = FakeLauncher {
            missing: ["py-a".to_string(), "py-b".to_string()].into_iter().collect(),
            ..FakeLauncher::default()
        };
        let f = fixture(
            SupervisorConfig {
                runtime_commands: vec!["py-a".into(), "py-b".into(), "py-c".into()],
                ..config()
            },
            launcher,
        );

        let record = f.supervisor.start().await.unwrap();
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 3);
        assert!(f.notifier.reports.lock().is_empty());
        assert_eq!(record.state, BackendState::Healthy);
        assert_eq!(record.port, Some(8100));
        assert_eq!(f.state.record.lock().as_ref().unwrap().port, Some(8100));
        f.supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_runtimes_is_fatal_and_reported() {
        let launcher = FakeLauncher {
            missing: ["py-a".to_string(), "py-b".to_string()].into_iter().collect(),
            ..FakeLauncher::default()
        };
        let f = fixture(
            SupervisorConfig {
                runtime_commands: vec!["py-a".into(), "py-b".into()],
                ..config()
            },
            launcher,
        );

        let err = f.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnExhausted { attempts: 2, .. }));
        let reports = f.notifier.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].reason, FatalReason::SpawnExhausted);
        assert_eq!(reports[0].attempts.len(), 2);
        assert!(!reports[0].suggestions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn startup_timeout_kills_the_process() {
        let f = fixture(config(), FakeLauncher::default());
        f.health.down.store(true, Ordering::SeqCst);

        let err = f.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartupTimeout { .. }));
        let child = f.launcher.children.lock()[0].clone();
        assert!(child.terminated.load(Ordering::SeqCst) || child.killed.load(Ordering::SeqCst));
        assert_eq!(f.supervisor.record().state, BackendState::Stopped);
        assert_eq!(
            f.notifier.reports.lock()[0].reason,
            FatalReason::StartupTimeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_restarts_in_place() {
        let f = fixture(config(), FakeLauncher::default());
        f.supervisor.start().await.unwrap();
        let mut updates = f.supervisor.subscribe();
        f.health.fail_next.store(1, Ordering::SeqCst);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 2);
        let record = f.supervisor.record();
        assert_eq!(record.state, BackendState::Healthy);
        assert_eq!(record.restart_count, 1);
        assert!(f.launcher.children.lock()[0]
            .terminated
            .load(Ordering::SeqCst));
        assert!(updates.has_changed().unwrap());
        f.supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_exit_triggers_restart() {
        let f = fixture(config(), FakeLauncher::default());
        f.supervisor.start().await.unwrap();
        f.launcher.children.lock()[0]
            .crashed
            .store(true, Ordering::SeqCst);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(f.supervisor.record().state, BackendState::Healthy);
        f.supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_restart_budget_marks_unhealthy() {
        let f = fixture(
            SupervisorConfig {
                max_restarts: 0,
                ..config()
            },
            FakeLauncher::default(),
        );
        f.supervisor.start().await.unwrap();
        f.health.down.store(true, Ordering::SeqCst);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(f.supervisor.record().state, BackendState::Unhealthy);

        f.health.down.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.supervisor.record().state, BackendState::Healthy);
        f.supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_process_and_clears_state() {
        let f = fixture(config(), FakeLauncher::default());
        f.supervisor.start().await.unwrap();
        let mut updates = f.supervisor.subscribe();
        assert!(f.state.record.lock().is_some());

        f.supervisor.shutdown().await;
        assert!(f.launcher.children.lock()[0]
            .terminated
            .load(Ordering::SeqCst));
        assert!(f.state.record.lock().is_none());
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow().state, BackendState::Stopped);

        f.supervisor.shutdown().await;
        assert_eq!(f.supervisor.record().state, BackendState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let f = fixture(config(), FakeLauncher::default());
        f.supervisor.start().await.unwrap();
        assert!(matches!(
            f.supervisor.start().await,
            Err(SupervisorError::AlreadyRunning)
        ));
        f.supervisor.shutdown().await;
    }
}
