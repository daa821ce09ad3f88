use crate::config::{ProcessSpec, SupervisorSettings};
use crate::error::Result;
use crate::process::pid::PidFile;
use crate::process::restart::{RestartPolicy, RestartTracker};
use crate::process::signal::terminate;
use crate::process::spawner::{spawn_process, SpawnedProcess};
use crate::process::types::{ProcessEvent, ProcessState, ProcessStatus, RestartCause};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What ended a wait on a running child
enum Event {
    Exited(std::io::Result<ExitStatus>),
    FileChanged,
    WatcherClosed,
    Shutdown,
}

/// What ended a wait while no child is running
enum Wake {
    Elapsed,
    FileChanged,
    Shutdown,
}

/// Owns one spec's child process and drives its state machine
///
/// Exit, file-change and shutdown events for a spec all arrive here, so at
/// most one OS process exists per spec and restarts are serialized.
pub(crate) struct Worker {
    spec: ProcessSpec,
    policy: RestartPolicy,
    tracker: RestartTracker,
    pid_file: PidFile,
    stop_timeout: Duration,
    launch_attempts: usize,
    forward_output: bool,
    launched_once: bool,
    launched_at: Instant,
    status: watch::Sender<ProcessStatus>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    triggers: Option<mpsc::Receiver<()>>,
    shutdown: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        spec: ProcessSpec,
        settings: &SupervisorSettings,
        status: watch::Sender<ProcessStatus>,
        events: mpsc::UnboundedSender<ProcessEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            policy: RestartPolicy::for_spec(&spec, settings),
            tracker: RestartTracker::new(),
            pid_file: PidFile::new(&spec.pid_file),
            stop_timeout: settings.stop_timeout_for(&spec),
            launch_attempts: settings.launch_attempts,
            forward_output: settings.forward_output,
            launched_once: false,
            launched_at: Instant::now(),
            status,
            events,
            triggers: None,
            shutdown,
            spec,
        }
    }

    /// Feed restart requests from a file watcher into this worker
    pub(crate) fn attach_triggers(&mut self, triggers: mpsc::Receiver<()>) {
        self.triggers = Some(triggers);
    }

    /// One launch attempt: spawn, record the PID file, mark running
    pub(crate) async fn launch_once(&mut self) -> Result<SpawnedProcess> {
        self.transition(ProcessState::Starting, None);

        let spawned = spawn_process(&self.spec, self.forward_output).await?;

        if let Err(e) = self.pid_file.write(spawned.pid) {
            warn!(process = %self.spec.name, pid = spawned.pid, "{}", e);
        }

        let relaunch = self.launched_once;
        self.launched_once = true;
        self.launched_at = Instant::now();
        self.status.send_modify(|s| {
            s.record_launch(spawned.pid);
            if relaunch {
                s.restarts += 1;
            }
        });

        info!(process = %self.spec.name, pid = spawned.pid, "Process running");
        self.publish(None);

        Ok(spawned)
    }

    /// Drive the state machine until shutdown.
    ///
    /// `initial` is the child from the first launch; `None` means that launch
    /// failed and counts as the first of `launch_attempts`.
    pub(crate) async fn run(mut self, initial: Option<Child>) {
        let mut current = match initial {
            Some(child) => Some(child),
            None => self.launch_with_retry(1).await,
        };

        loop {
            let Some(mut child) = current.take() else {
                match self.idle().await {
                    Wake::Shutdown => break,
                    Wake::FileChanged => {
                        info!(process = %self.spec.name, "File change, relaunching idle process");
                        self.transition(ProcessState::Restarting, Some(RestartCause::FileChange.to_string()));
                        current = self.launch_with_retry(0).await;
                    }
                    Wake::Elapsed => {}
                }
                continue;
            };

            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Event::Shutdown,
                status = child.wait() => Event::Exited(status),
                trigger = next_trigger(&mut self.triggers) => match trigger {
                    Some(()) => Event::FileChanged,
                    None => Event::WatcherClosed,
                },
            };

            match event {
                Event::Shutdown => {
                    self.stop_child(&mut child).await;
                    break;
                }
                Event::WatcherClosed => {
                    debug!(process = %self.spec.name, "Watcher closed, continuing without it");
                    self.triggers = None;
                    current = Some(child);
                }
                Event::FileChanged => {
                    info!(process = %self.spec.name, "File change, restarting process");
                    self.transition(ProcessState::Restarting, Some(RestartCause::FileChange.to_string()));
                    self.stop_child(&mut child).await;
                    drop(child);
                    current = self.launch_with_retry(0).await;
                }
                Event::Exited(status) => {
                    drop(child);
                    let uptime = self.launched_at.elapsed();
                    current = self.handle_exit(status, uptime).await;
                }
            }
        }

        if let Err(e) = self.pid_file.remove() {
            warn!(process = %self.spec.name, "{}", e);
        }
        self.status.send_modify(|s| {
            s.state = ProcessState::Stopped;
            s.pid = None;
        });
        self.publish(None);
        info!(process = %self.spec.name, "Process stopped");
    }

    /// Record an exit and relaunch when the policy allows it
    async fn handle_exit(
        &mut self,
        status: std::io::Result<ExitStatus>,
        uptime: Duration,
    ) -> Option<Child> {
        let (code, success, detail) = match status {
            Ok(status) => (status.code(), status.success(), status.to_string()),
            Err(e) => (None, false, format!("wait failed: {}", e)),
        };

        self.tracker.record_run(uptime, self.policy.min_uptime);
        self.status.send_modify(|s| s.record_exit(code, success));
        if success {
            info!(process = %self.spec.name, "Process exited ({})", detail);
        } else {
            warn!(process = %self.spec.name, "Process crashed ({})", detail);
        }
        self.publish(Some(detail));

        if !self.policy.should_restart(&mut self.tracker) {
            if self.policy.enabled {
                error!(
                    process = %self.spec.name,
                    "Process exceeded its restart limit, not restarting"
                );
                self.transition(ProcessState::Failed, Some("restart limit exceeded".to_string()));
            }
            if let Err(e) = self.pid_file.remove() {
                warn!(process = %self.spec.name, "{}", e);
            }
            return None;
        }

        let delay = self.policy.calculate_delay(&self.tracker);
        self.transition(ProcessState::Restarting, Some(RestartCause::Exit.to_string()));
        info!(process = %self.spec.name, "Restarting in {:?}", delay);

        match self.pause(delay).await {
            Wake::Shutdown => None,
            Wake::Elapsed | Wake::FileChanged => {
                self.tracker.record_restart();
                self.launch_with_retry(0).await
            }
        }
    }

    /// Launch with exponential backoff, starting at attempt `first_attempt`
    ///
    /// Gives up after `launch_attempts` in total and marks the spec failed.
    /// Returns `None` on shutdown as well.
    async fn launch_with_retry(&mut self, first_attempt: usize) -> Option<Child> {
        for attempt in first_attempt..self.launch_attempts {
            if attempt > 0 {
                let delay = self.policy.launch_retry_delay(attempt - 1);
                debug!(process = %self.spec.name, "Retrying launch in {:?}", delay);
                if let Wake::Shutdown = self.pause(delay).await {
                    return None;
                }
            }

            if self.shutdown.is_cancelled() {
                return None;
            }

            match self.launch_once().await {
                Ok(spawned) => return Some(spawned.child),
                Err(e) => {
                    warn!(
                        process = %self.spec.name,
                        "{} (attempt {}/{})",
                        e,
                        attempt + 1,
                        self.launch_attempts
                    );
                    self.publish(Some(e.to_string()));
                }
            }
        }

        error!(
            process = %self.spec.name,
            "Giving up after {} launch attempts",
            self.launch_attempts
        );
        if let Err(e) = self.pid_file.remove() {
            warn!(process = %self.spec.name, "{}", e);
        }
        self.status.send_modify(|s| s.pid = None);
        self.transition(ProcessState::Failed, Some("launch attempts exhausted".to_string()));
        None
    }

    async fn stop_child(&mut self, child: &mut Child) {
        if let Err(e) = terminate(
            child,
            &self.spec.name,
            &self.spec.stop_signal,
            self.stop_timeout,
        )
        .await
        {
            error!(process = %self.spec.name, "Failed to stop process: {}", e);
        }
        self.status.send_modify(|s| s.pid = None);
    }

    /// Wait with no child running, for shutdown or a file change
    async fn idle(&mut self) -> Wake {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Wake::Shutdown,
            trigger = next_trigger(&mut self.triggers) => match trigger {
                Some(()) => Wake::FileChanged,
                None => {
                    self.triggers = None;
                    Wake::Elapsed
                }
            },
        }
    }

    /// Sleep for `delay`; shutdown aborts it and a file change cuts it short
    async fn pause(&mut self, delay: Duration) -> Wake {
        let deadline = Instant::now() + delay;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Wake::Shutdown,
                _ = tokio::time::sleep_until(deadline) => return Wake::Elapsed,
                trigger = next_trigger(&mut self.triggers) => match trigger {
                    Some(()) => return Wake::FileChanged,
                    None => self.triggers = None,
                },
            }
        }
    }

    fn transition(&self, state: ProcessState, detail: Option<String>) {
        self.status.send_modify(|s| s.state = state);
        self.publish(detail);
    }

    fn publish(&self, detail: Option<String>) {
        let event = {
            let status = self.status.borrow();
            ProcessEvent {
                name: status.name.clone(),
                state: status.state,
                pid: status.pid,
                detail,
            }
        };
        let _ = self.events.send(event);
    }
}

async fn next_trigger(triggers: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match triggers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
