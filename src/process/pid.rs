// PID file management for supervised processes

use crate::error::{Result, VigiaError};
use std::fs;
use std::path::{Path, PathBuf};

/// A plain-text file holding the decimal PID of one supervised process
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Truncate and rewrite the file with `pid`, creating parent directories first
    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    VigiaError::PidFileError(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        fs::write(&self.path, pid.to_string()).map_err(|e| {
            VigiaError::PidFileError(format!(
                "Failed to write {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Read the PID from the file
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            VigiaError::PidFileError(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        content.trim().parse::<u32>().map_err(|e| {
            VigiaError::PidFileError(format!(
                "Invalid PID in {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Remove the file; a missing file is not an error
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VigiaError::PidFileError(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Whether the file names a PID that is currently alive
    pub fn is_running(&self) -> bool {
        match self.read() {
            Ok(pid) => is_process_alive(pid),
            Err(_) => false,
        }
    }
}

/// Check if a process with the given PID is alive
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 only performs the existence and permission checks
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = sysinfo::System::new();
    system.refresh_processes(
        sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
        true,
    );
    system.process(sysinfo::Pid::from_u32(pid)).is_some()
}
