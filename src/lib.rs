// Library exports for the vigia process supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod watch;

pub use config::{ConfigSet, ProcessSpec, SupervisorSettings};
pub use error::{Result, VigiaError};
pub use process::{ProcessState, ProcessStatus, StartReport, Supervisor};
