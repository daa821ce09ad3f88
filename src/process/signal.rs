use crate::error::{Result, VigiaError};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::Signal;

/// How a child ended when asked to stop
#[derive(Debug)]
pub enum StopOutcome {
    /// It had already exited before the signal was sent
    AlreadyExited(ExitStatus),
    /// It exited within the timeout after the stop signal
    Graceful(ExitStatus),
    /// It ignored the stop signal and was killed
    Forced,
}

#[cfg(unix)]
pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(VigiaError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

/// Signal the process group led by `pid`, or just `pid` when it leads none
#[cfg(unix)]
fn send_signal(name: &str, pid: u32, signal_name: &str) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let signal = parse_signal(signal_name)?;
    let target = Pid::from_raw(pid as i32);

    let result = match killpg(target, signal) {
        Err(Errno::ESRCH) => kill(target, signal),
        other => other,
    };

    result.map_err(|e| {
        VigiaError::SignalError(format!(
            "Failed to send {} to '{}' (PID: {}): {}",
            signal_name, name, pid, e
        ))
    })
}

#[cfg(not(unix))]
fn send_signal(name: &str, pid: u32, signal_name: &str) -> Result<()> {
    Err(VigiaError::SignalError(format!(
        "Cannot send {} to '{}' (PID: {}) on this platform",
        signal_name, name, pid
    )))
}

/// Stop a child and its process group: send `signal_name`, wait up to `timeout`, then SIGKILL
///
/// A child that outlives the timeout is reported as a `ShutdownTimeout`
/// warning and killed; the call itself only fails if waiting on the child fails.
pub async fn terminate(
    child: &mut Child,
    name: &str,
    signal_name: &str,
    timeout: Duration,
) -> Result<StopOutcome> {
    if let Some(status) = child.try_wait()? {
        debug!(process = %name, "Process already exited with {}", status);
        return Ok(StopOutcome::AlreadyExited(status));
    }

    let Some(pid) = child.id() else {
        let status = child.wait().await?;
        return Ok(StopOutcome::AlreadyExited(status));
    };

    info!(process = %name, pid, "Stopping process with {}", signal_name);

    if let Err(e) = send_signal(name, pid, signal_name) {
        // Fall through to the forced kill below
        warn!(process = %name, pid, "{}", e);
    } else {
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(process = %name, pid, "Process exited with {}", status);
                return Ok(StopOutcome::Graceful(status));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let err = VigiaError::ShutdownTimeout {
                    name: name.to_string(),
                    timeout,
                };
                warn!(process = %name, pid, "{}, sending SIGKILL", err);
            }
        }
    }

    // Take the rest of the group down before reaping the leader
    if let Err(e) = send_signal(name, pid, "SIGKILL") {
        debug!(process = %name, pid, "{}", e);
    }
    child.kill().await?;
    info!(process = %name, pid, "Process killed");
    Ok(StopOutcome::Forced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::process::Command;

    fn group_leader(script: &str) -> Child {
        Command::new("/bin/sh")
            .args(["-c", script])
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("SIGUSR2").unwrap(), Signal::SIGUSR2);
        assert!(matches!(
            parse_signal("SIGNOPE"),
            Err(VigiaError::SignalError(_))
        ));
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut child = Command::new("/bin/sleep").arg("30").spawn().unwrap();

        let outcome = terminate(&mut child, "sleeper", "SIGTERM", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(matches!(outcome, StopOutcome::Graceful(_)));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut child = group_leader("trap '' TERM; sleep 30");

        // Give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = terminate(
            &mut child,
            "stubborn",
            "SIGTERM",
            Duration::from_millis(300),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, StopOutcome::Forced));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let mut child = Command::new("/bin/true").spawn().unwrap();
        child.wait().await.unwrap();

        let outcome = terminate(&mut child, "done", "SIGTERM", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(outcome, StopOutcome::AlreadyExited(_)));
    }

    #[tokio::test]
    async fn test_terminate_reaches_wrapped_children() {
        let temp_dir = TempDir::new().unwrap();
        let ticks = temp_dir.path().join("ticks");
        let mut child = group_leader(&format!(
            "(while true; do echo x >> {}; sleep 0.05; done) & wait",
            ticks.display()
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        terminate(&mut child, "wrapper", "SIGTERM", Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let settled = std::fs::metadata(&ticks).unwrap().len();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(std::fs::metadata(&ticks).unwrap().len(), settled);
    }
}
