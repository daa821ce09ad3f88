use crate::config::{ConfigSet, ProcessSpec, SupervisorSettings};
use crate::error::{Result, VigiaError};
use crate::process::types::{ProcessEvent, ProcessState, ProcessStatus};
use crate::process::worker::Worker;
use crate::watch::{FileWatcher, WatchFilter};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of the initial launch of every spec
#[derive(Debug, Default)]
pub struct StartReport {
    /// Specs that are running, in specification order, with their PIDs
    pub launched: Vec<(String, u32)>,
    /// Specs whose first launch failed; their workers keep retrying
    pub failed: Vec<(String, VigiaError)>,
}

impl StartReport {
    pub fn all_launched(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loaded,
    Running,
    Stopped,
}

struct Runtime {
    phase: Phase,
    /// Status senders waiting for their worker, indexed like the specs
    pending: Vec<Option<watch::Sender<ProcessStatus>>>,
    workers: Vec<JoinHandle<()>>,
    watchers: Vec<FileWatcher>,
}

/// Keeps one live OS process per configured spec
///
/// All methods take `&self`; wrap the supervisor in an `Arc` to call
/// [`shutdown`](Self::shutdown) from another task while
/// [`monitor_loop`](Self::monitor_loop) is running.
pub struct Supervisor {
    config: ConfigSet,
    shutdown: CancellationToken,
    statuses: Vec<watch::Receiver<ProcessStatus>>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ProcessEvent>>>,
    runtime: Mutex<Runtime>,
}

impl Supervisor {
    /// Build a supervisor for an already validated configuration set
    pub fn new(config: ConfigSet) -> Self {
        let (senders, statuses): (Vec<_>, Vec<_>) = config
            .specs()
            .iter()
            .map(|spec| watch::channel(ProcessStatus::new(spec.name.clone())))
            .map(|(tx, rx)| (Some(tx), rx))
            .unzip();

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            shutdown: CancellationToken::new(),
            statuses,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            runtime: Mutex::new(Runtime {
                phase: Phase::Loaded,
                pending: senders,
                workers: Vec::new(),
                watchers: Vec::new(),
            }),
        }
    }

    /// Validate `specs` and build a supervisor for them
    ///
    /// Fails with a configuration error on a duplicate name or an empty
    /// command, before any process is started.
    pub fn load(specs: Vec<ProcessSpec>, settings: SupervisorSettings) -> Result<Self> {
        Ok(Self::new(ConfigSet::new(specs, settings)?))
    }

    /// Launch every spec in specification order
    ///
    /// Each PID is written to its spec's PID file. A failed launch is reported
    /// and retried in the background; it does not prevent the remaining specs
    /// from starting.
    pub async fn start(&self) -> Result<StartReport> {
        let mut runtime = self.runtime.lock().await;

        match runtime.phase {
            Phase::Loaded => {}
            Phase::Running => {
                return Err(VigiaError::InvalidState(
                    "supervisor is already started".to_string(),
                ))
            }
            Phase::Stopped => {
                return Err(VigiaError::InvalidState(
                    "supervisor has been shut down".to_string(),
                ))
            }
        }
        runtime.phase = Phase::Running;

        let settings = self.config.settings();
        let mut report = StartReport::default();

        info!("Starting {} process(es)", self.config.len());

        for (index, spec) in self.config.specs().iter().enumerate() {
            if self.shutdown.is_cancelled() {
                debug!("Shutdown requested, not launching remaining processes");
                break;
            }

            let status = runtime.pending[index].take().ok_or_else(|| {
                VigiaError::InvalidState(format!("process '{}' already has a worker", spec.name))
            })?;

            let mut worker = Worker::new(
                spec.clone(),
                settings,
                status,
                self.events_tx.clone(),
                self.shutdown.clone(),
            );

            let initial = match worker.launch_once().await {
                Ok(spawned) => {
                    report.launched.push((spec.name.clone(), spawned.pid));
                    Some(spawned.child)
                }
                Err(e) => {
                    warn!(process = %spec.name, "{}", e);
                    report.failed.push((spec.name.clone(), e));
                    None
                }
            };

            if spec.watch {
                match self.watch_files(spec) {
                    Ok((watcher, triggers)) => {
                        worker.attach_triggers(triggers);
                        runtime.watchers.push(watcher);
                    }
                    Err(e) => {
                        warn!(process = %spec.name, "{}; restarting on exit only", e);
                    }
                }
            }

            runtime.workers.push(tokio::spawn(worker.run(initial)));
        }

        info!(
            "Started {} of {} process(es)",
            report.launched.len(),
            self.config.len()
        );

        Ok(report)
    }

    /// Set up a debounced watcher on the working directory of `spec`
    ///
    /// The returned receiver yields one `()` per settled burst of changes.
    pub fn watch_files(&self, spec: &ProcessSpec) -> Result<(FileWatcher, mpsc::Receiver<()>)> {
        let settings = self.config.settings();
        let pid_files: Vec<PathBuf> = self
            .config
            .specs()
            .iter()
            .map(|s| s.pid_file.clone())
            .collect();

        let filter = WatchFilter::new(&spec.working_dir(), spec, settings, &pid_files);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let watcher = FileWatcher::spawn(
            &spec.name,
            filter,
            settings.watch_debounce(),
            trigger_tx,
            self.shutdown.clone(),
        )?;

        Ok((watcher, trigger_rx))
    }

    /// Observe process events until shutdown is requested
    ///
    /// Exit waiting and relaunching happen in the per-process workers; this
    /// loop reports their transitions and surfaces processes that failed.
    pub async fn monitor_loop(&self) -> Result<()> {
        let mut events = self.events_rx.lock().await.take().ok_or_else(|| {
            VigiaError::InvalidState("monitor loop is already running".to_string())
        })?;

        debug!("Monitor loop running");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => report_event(&event),
                    None => break,
                },
            }
        }

        *self.events_rx.lock().await = Some(events);
        debug!("Monitor loop stopped");
        Ok(())
    }

    /// Stop every process and remove the PID files
    ///
    /// Safe to call at any point and more than once; later calls return
    /// immediately.
    pub async fn shutdown(&self) -> Result<()> {
        // Cancel first so an in-progress start stops launching
        self.shutdown.cancel();

        let mut runtime = self.runtime.lock().await;
        if runtime.phase == Phase::Stopped {
            debug!("Supervisor already shut down");
            return Ok(());
        }
        runtime.phase = Phase::Stopped;

        info!("Shutting down supervisor");

        for handle in std::mem::take(&mut runtime.workers) {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }

        runtime.watchers.clear();

        // Specs that never got a worker
        for status in runtime.pending.iter_mut().filter_map(Option::take) {
            status.send_modify(|s| s.state = ProcessState::Stopped);
        }

        info!("Supervisor shutdown complete");
        Ok(())
    }

    /// Snapshot of every process in specification order
    pub fn status(&self) -> Vec<ProcessStatus> {
        self.statuses.iter().map(|rx| rx.borrow().clone()).collect()
    }

    /// Follow the status of one process
    pub fn subscribe(&self, name: &str) -> Result<watch::Receiver<ProcessStatus>> {
        self.config
            .specs()
            .iter()
            .position(|s| s.name == name)
            .map(|index| self.statuses[index].clone())
            .ok_or_else(|| VigiaError::ProcessNotFound(name.to_string()))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn report_event(event: &ProcessEvent) {
    let detail = event.detail.as_deref().unwrap_or("");

    match event.state {
        ProcessState::Failed => {
            error!(process = %event.name, "Process failed: {}", detail);
        }
        ProcessState::Crashed => {
            warn!(process = %event.name, "Process crashed: {}", detail);
        }
        ProcessState::Running => {
            info!(process = %event.name, pid = ?event.pid, "Process is running");
        }
        state => {
            debug!(process = %event.name, %state, "{}", detail);
        }
    }
}

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
pub async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            restart_delay_ms: 10,
            max_restart_delay_ms: 100,
            launch_attempts: 2,
            shutdown_timeout_ms: 1000,
            forward_output: false,
            ..SupervisorSettings::default()
        }
    }

    fn sleeper(dir: &TempDir, name: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::new(name, "/bin/sleep");
        spec.args = vec!["30".to_string()];
        spec.pid_file = dir.path().join(format!("{}.pid", name));
        spec
    }

    #[tokio::test]
    async fn test_load_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let result = Supervisor::load(
            vec![sleeper(&dir, "same"), sleeper(&dir, "same")],
            settings(),
        );
        assert!(matches!(result, Err(VigiaError::DuplicateName(_))));
    }

    #[tokio::test]
    async fn test_status_before_start_is_pending() {
        let dir = TempDir::new().unwrap();
        let supervisor = Supervisor::load(vec![sleeper(&dir, "a")], settings()).unwrap();

        let status = supervisor.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, ProcessState::Pending);
        assert!(matches!(
            supervisor.subscribe("missing"),
            Err(VigiaError::ProcessNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let dir = TempDir::new().unwrap();
        let supervisor = Supervisor::load(vec![sleeper(&dir, "a")], settings()).unwrap();

        supervisor.start().await.unwrap();
        assert!(matches!(
            supervisor.start().await,
            Err(VigiaError::InvalidState(_))
        ));

        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_invalid() {
        let dir = TempDir::new().unwrap();
        let supervisor = Supervisor::load(vec![sleeper(&dir, "a")], settings()).unwrap();

        supervisor.shutdown().await.unwrap();
        assert_eq!(supervisor.status()[0].state, ProcessState::Stopped);
        assert!(matches!(
            supervisor.start().await,
            Err(VigiaError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_monitor_loop_returns_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let supervisor =
            Arc::new(Supervisor::load(vec![sleeper(&dir, "a")], settings()).unwrap());
        supervisor.start().await.unwrap();

        let monitor = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.monitor_loop().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), monitor)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(supervisor.is_shutdown_requested());
    }
}
