use crate::config::ProcessSpec;
use crate::error::{Result, VigiaError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// Process name from configuration
    pub name: String,
}

/// Spawn a process based on the provided spec
///
/// A relative command that names a file in the working directory runs that
/// file, through its interpreter when it has one (see [`resolve_command`]).
/// The command runs with the spec's arguments, working directory and extra
/// environment, as the leader of a new process group. With `forward_output` set, stdout and stderr are piped and
/// every line is re-emitted through the log under the `vigia::output` target;
/// otherwise the child inherits the supervisor's terminal.
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(VigiaError::LaunchError)` - The OS refused to create the process
pub async fn spawn_process(spec: &ProcessSpec, forward_output: bool) -> Result<SpawnedProcess> {
    let (program, leading_args) = resolve_command(spec);
    let mut command = Command::new(&program);
    command.args(&leading_args);

    if !spec.args.is_empty() {
        command.args(&spec.args);
    }

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    for (key, value) in &spec.env {
        command.env(key, value);
    }

    command.stdin(Stdio::null());
    if forward_output {
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
    } else {
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());
    }

    // A worker that is aborted mid-flight must not leak its child
    command.kill_on_drop(true);

    // Stop signals go to the whole group, reaching wrapper shells' children
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| VigiaError::LaunchError {
        name: spec.name.clone(),
        reason: e.to_string(),
    })?;

    let pid = child.id().ok_or_else(|| VigiaError::LaunchError {
        name: spec.name.clone(),
        reason: "process exited before its PID could be read".to_string(),
    })?;

    if forward_output {
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, spec.name.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, spec.name.clone(), true));
        }
    }

    Ok(SpawnedProcess {
        child,
        pid,
        name: spec.name.clone(),
    })
}

/// Program to execute and the arguments that precede the spec's own
///
/// A relative command is looked up in the working directory first and falls
/// back to the `PATH` search when no such file exists there. The interpreter
/// is the spec's, or one picked from the file extension; `"none"` disables it.
pub fn resolve_command(spec: &ProcessSpec) -> (OsString, Vec<OsString>) {
    let script = resolve_script(spec);

    let interpreter = match spec.interpreter.as_deref() {
        Some("none") => None,
        Some(interpreter) => Some(interpreter),
        None => default_interpreter(&script),
    };

    match interpreter {
        Some(interpreter) => (interpreter.into(), vec![script.into_os_string()]),
        None => (script.into_os_string(), Vec::new()),
    }
}

fn resolve_script(spec: &ProcessSpec) -> PathBuf {
    let command = Path::new(&spec.command);
    if command.is_absolute() {
        return command.to_path_buf();
    }

    let local = spec.working_dir().join(command);
    if local.is_file() {
        local
    } else {
        command.to_path_buf()
    }
}

fn default_interpreter(script: &Path) -> Option<&'static str> {
    match script.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("js") | Some("cjs") | Some("mjs") => Some("node"),
        Some("sh") => Some("sh"),
        _ => None,
    }
}

async fn forward_lines<R>(stream: R, name: String, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(target: "vigia::output", process = %name, "{}", line);
        } else {
            info!(target: "vigia::output", process = %name, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spawn_simple_process() {
        let spec = ProcessSpec::new("test-echo", "/bin/echo");

        let spawned = spawn_process(&spec, true).await.unwrap();
        assert_eq!(spawned.name, "test-echo");
        assert!(spawned.pid > 0);
    }

    #[tokio::test]
    async fn test_spawn_with_args_and_env() {
        let mut spec = ProcessSpec::new("test-env", "/bin/sh");
        spec.args = vec!["-c".to_string(), "test \"$VIGIA_SPAWN\" = yes".to_string()];
        spec.env
            .insert("VIGIA_SPAWN".to_string(), "yes".to_string());

        let mut spawned = spawn_process(&spec, false).await.unwrap();
        let status = spawned.child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_with_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("marker"), "x").unwrap();

        let mut spec = ProcessSpec::new("test-cwd", "/bin/sh");
        spec.args = vec!["-c".to_string(), "test -f marker".to_string()];
        spec.cwd = Some(temp_dir.path().to_path_buf());

        let mut spawned = spawn_process(&spec, false).await.unwrap();
        assert!(spawned.child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_spawn_forwarding_takes_pipes() {
        let spec = ProcessSpec::new("test-output", "/bin/echo");

        let spawned = spawn_process(&spec, true).await.unwrap();

        // The forwarding tasks own the pipes now
        assert!(spawned.child.stdout.is_none());
        assert!(spawned.child.stderr.is_none());
    }

    #[test]
    fn test_resolve_bare_name_on_path() {
        let spec = ProcessSpec::new("sleeper", "sleep");
        let (program, leading) = resolve_command(&spec);
        assert_eq!(program, OsString::from("sleep"));
        assert!(leading.is_empty());
    }

    #[test]
    fn test_resolve_script_in_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("_crawjudapp.py");
        std::fs::write(&script, "print('hi')").unwrap();

        let mut spec = ProcessSpec::new("crawjud_app", "_crawjudapp.py");
        spec.cwd = Some(temp_dir.path().to_path_buf());

        let (program, leading) = resolve_command(&spec);
        assert_eq!(program, OsString::from("python3"));
        assert_eq!(leading, vec![script.into_os_string()]);
    }

    #[test]
    fn test_resolve_interpreter_override_and_none() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("bin").join("run");
        std::fs::create_dir(temp_dir.path().join("bin")).unwrap();
        std::fs::write(&script, "#!/bin/sh").unwrap();

        let mut spec = ProcessSpec::new("runner", "bin/run");
        spec.cwd = Some(temp_dir.path().to_path_buf());

        let (program, _) = resolve_command(&spec);
        assert_eq!(program, script.clone().into_os_string());

        spec.interpreter = Some("/bin/bash".to_string());
        let (program, leading) = resolve_command(&spec);
        assert_eq!(program, OsString::from("/bin/bash"));
        assert_eq!(leading, vec![script.into_os_string()]);

        let mut py = ProcessSpec::new("py", "/opt/app/main.py");
        py.interpreter = Some("none".to_string());
        assert_eq!(resolve_command(&py).0, OsString::from("/opt/app/main.py"));
    }

    #[tokio::test]
    async fn test_spawn_script_from_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("job.sh"),
            "echo \"$1\" > out.txt\n",
        )
        .unwrap();

        let mut spec = ProcessSpec::new("job", "job.sh");
        spec.args = vec!["ran".to_string()];
        spec.cwd = Some(temp_dir.path().to_path_buf());

        let mut spawned = spawn_process(&spec, false).await.unwrap();
        assert!(spawned.child.wait().await.unwrap().success());

        let out = std::fs::read_to_string(temp_dir.path().join("out.txt")).unwrap();
        assert_eq!(out.trim(), "ran");
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let spec = ProcessSpec::new("test-nonexistent", "/nonexistent/command");

        match spawn_process(&spec, true).await {
            Err(VigiaError::LaunchError { name, .. }) => assert_eq!(name, "test-nonexistent"),
            other => panic!("Expected LaunchError, got {:?}", other.map(|s| s.pid)),
        }
    }
}
