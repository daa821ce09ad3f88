use crate::error::{Result, VigiaError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Signals accepted as `stop_signal`
pub const VALID_STOP_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// Description of one managed child process
///
/// Field names follow the ecosystem-file vocabulary, so `cmd`/`script` and
/// `pid`/`pidFilePath` are accepted as aliases. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name (unique identifier)
    pub name: String,

    /// Executable path or name to invoke
    #[serde(alias = "cmd", alias = "script")]
    pub command: String,

    /// Program that runs `command`, e.g. `python3`; `"none"` runs it directly.
    /// Unset, it is picked from the command's extension.
    #[serde(default, alias = "exec_interpreter")]
    pub interpreter: Option<String>,

    /// Command-line arguments, either a list or a whitespace-separated string
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,

    /// Relaunch after exit, whatever the exit code
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Restart when files change under the working directory
    #[serde(default)]
    pub watch: bool,

    /// Where the OS process id of the running instance is recorded.
    /// Left empty, it resolves to `<pid_dir>/<name>.pid` when the set is built.
    #[serde(default, alias = "pid", alias = "pidFilePath")]
    pub pid_file: PathBuf,

    /// Working directory for the process, also the watch root
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Additional paths or path components ignored by the watcher
    #[serde(default)]
    pub ignore_watch: Vec<String>,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Per-process override of the graceful stop timeout
    #[serde(default)]
    pub kill_timeout_ms: Option<u64>,

    /// Per-process override of the initial restart delay
    #[serde(default)]
    pub restart_delay_ms: Option<u64>,

    /// Crash restarts allowed within the restart window (unlimited when unset)
    #[serde(default)]
    pub max_restarts: Option<usize>,
}

fn default_autorestart() -> bool {
    true
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArgsField {
    Line(String),
    List(Vec<String>),
}

fn deserialize_args<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match ArgsField::deserialize(deserializer)? {
        ArgsField::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        ArgsField::List(list) => list,
    })
}

impl ProcessSpec {
    /// Create a spec with default policy for the given name and command
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            interpreter: None,
            args: Vec::new(),
            autorestart: default_autorestart(),
            watch: false,
            pid_file: PathBuf::new(),
            cwd: None,
            env: HashMap::new(),
            ignore_watch: Vec::new(),
            stop_signal: default_stop_signal(),
            kill_timeout_ms: None,
            restart_delay_ms: None,
            max_restarts: None,
        }
    }

    /// Validate a single spec in isolation
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VigiaError::MissingConfigField("name".to_string()));
        }

        if self.command.trim().is_empty() {
            return Err(VigiaError::ConfigError(format!(
                "command for '{}' must not be empty",
                self.name
            )));
        }

        if matches!(self.interpreter.as_deref(), Some(i) if i.trim().is_empty()) {
            return Err(VigiaError::ConfigError(format!(
                "interpreter for '{}' must not be empty; use \"none\" to run the command directly",
                self.name
            )));
        }

        if !VALID_STOP_SIGNALS.contains(&self.stop_signal.as_str()) {
            return Err(VigiaError::ConfigError(format!(
                "Invalid stop_signal for '{}': {}. Must be one of: {}",
                self.name,
                self.stop_signal,
                VALID_STOP_SIGNALS.join(", ")
            )));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(VigiaError::ConfigError(format!(
                    "Working directory for '{}' is not a directory: {}",
                    self.name,
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Directory the process runs in and the watcher observes
    pub fn working_dir(&self) -> PathBuf {
        match self.cwd {
            Some(ref cwd) => cwd.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Expand `$VAR` and `${VAR}` references from the supervisor's environment
    fn expand_env_vars(&mut self) {
        self.command = expand_env_in_string(&self.command);
        self.interpreter = self.interpreter.as_deref().map(expand_env_in_string);
        self.args = self.args.iter().map(|a| expand_env_in_string(a)).collect();
        self.cwd = self.cwd.as_deref().map(expand_env_in_path);
        self.pid_file = expand_env_in_path(&self.pid_file);
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Expand environment variables in a string. Unset variables are left as written.
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => result.push_str(&value),
            _ => result.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    result.push_str(rest);
    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

/// Supervisor-wide policy values
///
/// Every knob has a default; a configuration file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Initial backoff before a relaunch
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Ceiling for the exponential backoff
    #[serde(default = "default_max_restart_delay_ms")]
    pub max_restart_delay_ms: u64,

    /// Window used to count restarts against `max_restarts`
    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,

    /// A run lasting at least this long resets the crash backoff
    #[serde(default = "default_min_uptime_ms")]
    pub min_uptime_ms: u64,

    /// Launch attempts before a process is marked failed
    #[serde(default = "default_launch_attempts")]
    pub launch_attempts: usize,

    /// Quiet period that closes a burst of file events
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// Wait after the stop signal before SIGKILL
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Directory for PID files of specs that do not name one
    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,

    /// Log child stdout/stderr through the supervisor instead of inheriting the terminal
    #[serde(default = "default_forward_output")]
    pub forward_output: bool,

    /// Path components no watcher reacts to
    #[serde(default = "default_watch_ignore")]
    pub watch_ignore: Vec<String>,
}

fn default_restart_delay_ms() -> u64 {
    1000
}

fn default_max_restart_delay_ms() -> u64 {
    30_000
}

fn default_restart_window_secs() -> u64 {
    60
}

fn default_min_uptime_ms() -> u64 {
    1000
}

fn default_launch_attempts() -> usize {
    5
}

fn default_watch_debounce_ms() -> u64 {
    500
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from(".vigia/pids")
}

fn default_forward_output() -> bool {
    true
}

fn default_watch_ignore() -> Vec<String> {
    [".git", "node_modules", "__pycache__", "target", ".vigia"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay_ms(),
            max_restart_delay_ms: default_max_restart_delay_ms(),
            restart_window_secs: default_restart_window_secs(),
            min_uptime_ms: default_min_uptime_ms(),
            launch_attempts: default_launch_attempts(),
            watch_debounce_ms: default_watch_debounce_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            pid_dir: default_pid_dir(),
            forward_output: default_forward_output(),
            watch_ignore: default_watch_ignore(),
        }
    }
}

impl SupervisorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.launch_attempts == 0 {
            return Err(VigiaError::ConfigError(
                "launch_attempts must be at least 1".to_string(),
            ));
        }

        if self.max_restart_delay_ms < self.restart_delay_ms {
            return Err(VigiaError::ConfigError(format!(
                "max_restart_delay_ms ({}) must not be below restart_delay_ms ({})",
                self.max_restart_delay_ms, self.restart_delay_ms
            )));
        }

        Ok(())
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    /// Graceful stop timeout for a spec, honouring its override
    pub fn stop_timeout_for(&self, spec: &ProcessSpec) -> Duration {
        Duration::from_millis(spec.kill_timeout_ms.unwrap_or(self.shutdown_timeout_ms))
    }
}

/// Drop `.` components so `./a.pid` and `a.pid` compare equal
fn strip_cur_dir(path: &Path) -> PathBuf {
    let stripped: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    if stripped.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        stripped
    }
}

/// A validated, immutable set of process specs plus supervisor settings
#[derive(Debug, Clone)]
pub struct ConfigSet {
    specs: Vec<ProcessSpec>,
    settings: SupervisorSettings,
}

impl ConfigSet {
    /// Validate the specs and resolve defaults.
    ///
    /// Fails before anything is launched if a name or PID file is used twice,
    /// or if any single spec is malformed.
    pub fn new(specs: Vec<ProcessSpec>, settings: SupervisorSettings) -> Result<Self> {
        settings.validate()?;

        let mut names = HashSet::new();
        let mut pid_files = HashSet::new();
        let mut resolved = Vec::with_capacity(specs.len());

        for mut spec in specs {
            spec.validate()?;

            if !names.insert(spec.name.clone()) {
                return Err(VigiaError::DuplicateName(spec.name));
            }

            if spec.pid_file.as_os_str().is_empty() {
                spec.pid_file = settings.pid_dir.join(format!("{}.pid", spec.name));
            }
            spec.pid_file = strip_cur_dir(&spec.pid_file);

            if !pid_files.insert(spec.pid_file.clone()) {
                return Err(VigiaError::ConfigError(format!(
                    "PID file {} is shared by more than one process",
                    spec.pid_file.display()
                )));
            }

            resolved.push(spec);
        }

        Ok(Self {
            specs: resolved,
            settings,
        })
    }

    /// Load a configuration file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VigiaError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let file = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(VigiaError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        if file.apps.is_empty() {
            return Err(VigiaError::InvalidConfig(
                "No process configuration found in file".to_string(),
            ));
        }

        let specs = file
            .apps
            .into_iter()
            .map(|mut spec| {
                spec.expand_env_vars();
                spec
            })
            .collect();

        Self::new(specs, file.supervisor)
    }

    fn parse_toml(contents: &str) -> Result<ConfigFile> {
        toml::from_str(contents)
            .map_err(|e| VigiaError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<ConfigFile> {
        serde_json::from_str(contents)
            .map_err(|e| VigiaError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    pub fn specs(&self) -> &[ProcessSpec] {
        &self.specs
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn find(&self, name: &str) -> Option<&ProcessSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// On-disk layout: an `apps` (or `processes`) array and an optional `supervisor` table
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    supervisor: SupervisorSettings,
    #[serde(default, alias = "processes")]
    apps: Vec<ProcessSpec>,
}
