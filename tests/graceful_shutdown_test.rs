use std::time::{Duration, Instant};
use tempfile::TempDir;
use vigia::config::{ProcessSpec, SupervisorSettings};
use vigia::process::{is_process_alive, ProcessState, Supervisor};

fn create_test_spec(dir: &TempDir, name: &str, script: &str) -> ProcessSpec {
    let mut spec = ProcessSpec::new(name, "/bin/sh");
    spec.args = vec!["-c".to_string(), script.to_string()];
    spec.pid_file = dir.path().join(format!("{}.pid", name));
    spec
}

fn settings(shutdown_timeout_ms: u64) -> SupervisorSettings {
    SupervisorSettings {
        shutdown_timeout_ms,
        forward_output: false,
        ..SupervisorSettings::default()
    }
}

#[tokio::test]
async fn test_graceful_shutdown_with_sigterm() {
    let dir = TempDir::new().unwrap();
    let spec = create_test_spec(&dir, "sigterm-test", "exec sleep 30");

    let supervisor = Supervisor::load(vec![spec], settings(5000)).unwrap();
    let report = supervisor.start().await.unwrap();
    let pid = report.launched[0].1;

    let started = Instant::now();
    supervisor.shutdown().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!is_process_alive(pid));
    assert_eq!(supervisor.status()[0].state, ProcessState::Stopped);
}

#[tokio::test]
async fn test_graceful_shutdown_with_custom_signal() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("got-int");
    let mut spec = create_test_spec(
        &dir,
        "sigint-test",
        &format!("trap 'touch {}; exit 0' INT; while true; do sleep 0.1; done", marker.display()),
    );
    spec.stop_signal = "SIGINT".to_string();

    let supervisor = Supervisor::load(vec![spec], settings(5000)).unwrap();
    supervisor.start().await.unwrap();

    // Let the shell install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.shutdown().await.unwrap();

    assert!(marker.exists());
}

#[tokio::test]
async fn test_shutdown_escalates_to_sigkill() {
    let dir = TempDir::new().unwrap();
    let mut spec = create_test_spec(&dir, "stubborn", "trap '' TERM; while true; do sleep 0.1; done");
    spec.kill_timeout_ms = Some(500);

    let supervisor = Supervisor::load(vec![spec], settings(60_000)).unwrap();
    let report = supervisor.start().await.unwrap();
    let pid = report.launched[0].1;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    supervisor.shutdown().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(10));
    assert!(!is_process_alive(pid));
}
