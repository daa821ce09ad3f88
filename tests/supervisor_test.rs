use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use vigia::config::{ProcessSpec, SupervisorSettings};
use vigia::error::VigiaError;
use vigia::process::{is_process_alive, PidFile, ProcessState, ProcessStatus, Supervisor};

fn test_settings() -> SupervisorSettings {
    SupervisorSettings {
        restart_delay_ms: 20,
        max_restart_delay_ms: 200,
        launch_attempts: 2,
        shutdown_timeout_ms: 2000,
        forward_output: false,
        ..SupervisorSettings::default()
    }
}

fn create_spec(dir: &Path, name: &str, command: &str, args: &[&str]) -> ProcessSpec {
    let mut spec = ProcessSpec::new(name, command);
    spec.args = args.iter().map(|a| a.to_string()).collect();
    spec.pid_file = dir.join("pids").join(format!("{}.pid", name));
    spec
}

async fn wait_until<F>(supervisor: &Supervisor, name: &str, condition: F) -> ProcessStatus
where
    F: Fn(&ProcessStatus) -> bool,
{
    let mut rx = supervisor.subscribe(name).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| condition(s)))
        .await
        .expect("timed out waiting for process status")
        .unwrap();
    status.clone()
}

#[tokio::test]
async fn test_start_launches_one_process_per_spec() {
    let dir = TempDir::new().unwrap();
    let specs = vec![
        create_spec(dir.path(), "web", "/bin/sleep", &["30"]),
        create_spec(dir.path(), "worker", "/bin/sleep", &["30"]),
    ];

    let supervisor = Supervisor::load(specs, test_settings()).unwrap();
    let report = supervisor.start().await.unwrap();

    assert!(report.all_launched());
    let names: Vec<&str> = report.launched.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["web", "worker"]);

    for (name, pid) in &report.launched {
        let pid_file = PidFile::new(dir.path().join("pids").join(format!("{}.pid", name)));
        assert_eq!(pid_file.read().unwrap(), *pid);
        assert!(is_process_alive(*pid));
    }

    let status = supervisor.status();
    assert!(status.iter().all(|s| s.state == ProcessState::Running));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_name_rejected_before_launch() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("launched");
    let specs = vec![
        create_spec(
            dir.path(),
            "app",
            "/bin/sh",
            &["-c", &format!("touch {}; sleep 30", marker.display())],
        ),
        create_spec(dir.path(), "app", "/bin/sleep", &["30"]),
    ];

    let result = Supervisor::load(specs, test_settings());
    assert!(matches!(result, Err(VigiaError::DuplicateName(name)) if name == "app"));
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_failed_launch_is_reported_and_others_start() {
    let dir = TempDir::new().unwrap();
    let specs = vec![
        create_spec(dir.path(), "missing", "/nonexistent/binary", &[]),
        create_spec(dir.path(), "ok", "/bin/sleep", &["30"]),
    ];

    let supervisor = Supervisor::load(specs, test_settings()).unwrap();
    let report = supervisor.start().await.unwrap();

    assert_eq!(report.launched.len(), 1);
    assert_eq!(report.launched[0].0, "ok");
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        &report.failed[0],
        (name, VigiaError::LaunchError { .. }) if name == "missing"
    ));

    let failed = wait_until(&supervisor, "missing", |s| s.state == ProcessState::Failed).await;
    assert_eq!(failed.pid, None);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_autorestart_relaunches_after_exit() {
    let dir = TempDir::new().unwrap();
    let specs = vec![create_spec(dir.path(), "flaky", "/bin/sh", &["-c", "sleep 0.2"])];

    let supervisor = Supervisor::load(specs, test_settings()).unwrap();
    let report = supervisor.start().await.unwrap();
    let first_pid = report.launched[0].1;

    let status = wait_until(&supervisor, "flaky", |s| {
        s.restarts >= 1 && s.state == ProcessState::Running
    })
    .await;

    assert_ne!(status.pid, Some(first_pid));
    assert_eq!(status.last_exit_code, Some(0));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_autorestart_leaves_process_exited() {
    let dir = TempDir::new().unwrap();
    let mut spec = create_spec(dir.path(), "oneshot", "/bin/true", &[]);
    spec.autorestart = false;
    let pid_path = spec.pid_file.clone();

    let supervisor = Supervisor::load(vec![spec], test_settings()).unwrap();
    supervisor.start().await.unwrap();

    let status = wait_until(&supervisor, "oneshot", |s| s.state == ProcessState::Exited).await;
    assert_eq!(status.restarts, 0);
    assert_eq!(status.pid, None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = &supervisor.status()[0];
    assert_eq!(status.state, ProcessState::Exited);
    assert_eq!(status.restarts, 0);
    assert!(!pid_path.exists());

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_crash_limit_marks_failed() {
    let dir = TempDir::new().unwrap();
    let mut spec = create_spec(dir.path(), "crasher", "/bin/sh", &["-c", "exit 3"]);
    spec.max_restarts = Some(2);

    let supervisor = Supervisor::load(vec![spec], test_settings()).unwrap();
    supervisor.start().await.unwrap();

    let status = wait_until(&supervisor, "crasher", |s| s.state == ProcessState::Failed).await;
    assert_eq!(status.restarts, 2);
    assert_eq!(status.last_exit_code, Some(3));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_everything_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let specs = vec![
        create_spec(dir.path(), "a", "/bin/sleep", &["30"]),
        create_spec(dir.path(), "b", "/bin/sleep", &["30"]),
    ];
    let pid_paths: Vec<_> = specs.iter().map(|s| s.pid_file.clone()).collect();

    let supervisor = Supervisor::load(specs, test_settings()).unwrap();
    let report = supervisor.start().await.unwrap();

    supervisor.shutdown().await.unwrap();

    for (_, pid) in &report.launched {
        assert!(!is_process_alive(*pid));
    }
    for path in &pid_paths {
        assert!(!path.exists());
    }
    assert!(supervisor
        .status()
        .iter()
        .all(|s| s.state == ProcessState::Stopped && s.pid.is_none()));

    supervisor.shutdown().await.unwrap();
    assert!(matches!(
        supervisor.start().await,
        Err(VigiaError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_shutdown_during_restart_delay() {
    let dir = TempDir::new().unwrap();
    let specs = vec![create_spec(dir.path(), "slow", "/bin/true", &[])];
    let settings = SupervisorSettings {
        restart_delay_ms: 60_000,
        max_restart_delay_ms: 60_000,
        ..test_settings()
    };

    let supervisor = Supervisor::load(specs, settings).unwrap();
    supervisor.start().await.unwrap();
    wait_until(&supervisor, "slow", |s| s.state == ProcessState::Restarting).await;

    tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
        .await
        .expect("shutdown waited for the restart delay")
        .unwrap();

    assert_eq!(supervisor.status()[0].state, ProcessState::Stopped);
}
