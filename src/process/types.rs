use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Lifecycle state of one supervised spec
///
/// `Pending → Starting → Running → (Exited | Crashed) → Restarting → Starting → …`,
/// with `Failed` once launching gives up and `Stopped` only after shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Pending,
    Starting,
    Running,
    Exited,
    Crashed,
    Restarting,
    Failed,
    Stopped,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Pending => write!(f, "pending"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Crashed => write!(f, "crashed"),
            ProcessState::Restarting => write!(f, "restarting"),
            ProcessState::Failed => write!(f, "failed"),
            ProcessState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of a supervised process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub state: ProcessState,
    /// OS process id of the current instance, if one is running
    pub pid: Option<u32>,
    /// Relaunches after the initial start (exit, file change or retry)
    pub restarts: usize,
    pub started_at: Option<SystemTime>,
    pub last_exit_code: Option<i32>,
}

impl ProcessStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ProcessState::Pending,
            pid: None,
            restarts: 0,
            started_at: None,
            last_exit_code: None,
        }
    }

    pub(crate) fn record_launch(&mut self, pid: u32) {
        self.state = ProcessState::Running;
        self.pid = Some(pid);
        self.started_at = Some(SystemTime::now());
    }

    pub(crate) fn record_exit(&mut self, code: Option<i32>, success: bool) {
        self.pid = None;
        self.last_exit_code = code;
        self.state = if success {
            ProcessState::Exited
        } else {
            ProcessState::Crashed
        };
    }
}

/// Why a process is being relaunched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartCause {
    Exit,
    FileChange,
}

impl std::fmt::Display for RestartCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartCause::Exit => write!(f, "exit"),
            RestartCause::FileChange => write!(f, "file change"),
        }
    }
}

/// State transition published by a worker to the monitor loop
#[derive(Debug, Clone)]
pub struct ProcessEvent {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub detail: Option<String>,
}
