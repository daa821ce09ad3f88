// Process module - launching, stopping and relaunching supervised processes

pub mod pid;
pub mod restart;
pub mod signal;
pub mod spawner;
pub mod supervisor;
pub mod types;
mod worker;

pub use pid::{is_process_alive, PidFile};
pub use restart::{RestartPolicy, RestartTracker};
pub use signal::{terminate, StopOutcome};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{shutdown_signal, StartReport, Supervisor};
pub use types::{ProcessEvent, ProcessState, ProcessStatus, RestartCause};
