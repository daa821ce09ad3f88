//! Filesystem watching for `watch = true` processes.
//!
//! A [`FileWatcher`] observes a process's working directory recursively with
//! `notify`, drops events for ignored paths, and coalesces the rest with a
//! [`Debouncer`] so that a burst of changes produces a single restart trigger.

use crate::config::{ProcessSpec, SupervisorSettings};
use crate::error::{Result, VigiaError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decides which filesystem events may trigger a restart
#[derive(Debug, Clone)]
pub struct WatchFilter {
    root: PathBuf,
    ignore_components: Vec<OsString>,
    ignore_paths: Vec<PathBuf>,
}

impl WatchFilter {
    /// Build the filter for `spec` rooted at `root`.
    ///
    /// `pid_files` are the PID files of every spec in the set; writing them must
    /// never look like a source change.
    pub fn new(
        root: &Path,
        spec: &ProcessSpec,
        settings: &SupervisorSettings,
        pid_files: &[PathBuf],
    ) -> Self {
        let root = normalize(root);
        let mut ignore_components: Vec<OsString> =
            settings.watch_ignore.iter().map(OsString::from).collect();
        let mut ignore_paths = Vec::new();

        for entry in &spec.ignore_watch {
            if entry.contains('/') {
                ignore_paths.push(normalize(&root.join(entry)));
            } else {
                ignore_components.push(OsString::from(entry));
            }
        }

        for pid_file in pid_files {
            let pid_file = normalize(pid_file);
            if let Some(parent) = pid_file.parent() {
                if parent != root && parent.starts_with(&root) {
                    ignore_paths.push(parent.to_path_buf());
                }
            }
            ignore_paths.push(pid_file);
        }

        Self {
            root,
            ignore_components,
            ignore_paths,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a single path is excluded from watching
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.ignore_paths.iter().any(|p| path.starts_with(p)) {
            return true;
        }

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().any(|c| match c {
            Component::Normal(name) => self.ignore_components.iter().any(|i| i == name),
            _ => false,
        })
    }

    /// Whether an event counts as a change: create, modify or remove on a watched path
    pub fn is_relevant(&self, event: &Event) -> bool {
        let kind_matches = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        );

        kind_matches && event.paths.iter().any(|p| !self.is_ignored(p))
    }
}

/// Make a path absolute and resolve symlinks where the path exists
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    if let Ok(canonical) = absolute.canonicalize() {
        return canonical;
    }

    // The file may not exist yet; canonicalize what does
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(file_name)) => normalize_parent(parent).join(file_name),
        _ => absolute,
    }
}

fn normalize_parent(parent: &Path) -> PathBuf {
    match parent.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => match (parent.parent(), parent.file_name()) {
            (Some(grand), Some(name)) => normalize_parent(grand).join(name),
            _ => parent.components().collect(),
        },
    }
}

/// Trailing-edge debouncer: fires once after `window` passes with no new event
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Record an event seen at `now`, pushing the deadline out
    pub fn note(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// When the pending burst settles, if one is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` exactly once per burst, when its deadline has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Recursive watcher on one process's working directory
///
/// Dropping it stops the underlying `notify` watcher and ends the debounce task.
pub struct FileWatcher {
    name: String,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl FileWatcher {
    /// Start watching `filter.root()` and send one `()` on `trigger_tx` per settled burst
    ///
    /// # Returns
    /// * `Err(VigiaError::WatchError)` - The watch could not be set up
    pub fn spawn(
        name: &str,
        filter: WatchFilter,
        debounce: Duration,
        trigger_tx: mpsc::Sender<()>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let watch_error = |reason: String| VigiaError::WatchError {
            name: name.to_string(),
            reason,
        };

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Event>();
        let callback_name = name.to_string();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = raw_tx.send(event);
            }
            Err(e) => warn!(process = %callback_name, "Watch error: {}", e),
        })
        .map_err(|e| watch_error(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(filter.root(), RecursiveMode::Recursive)
            .map_err(|e| {
                watch_error(format!(
                    "Failed to watch {}: {}",
                    filter.root().display(),
                    e
                ))
            })?;

        info!(process = %name, "Watching {} for changes", filter.root().display());

        let task = tokio::spawn(debounce_loop(
            name.to_string(),
            filter,
            Debouncer::new(debounce),
            raw_rx,
            trigger_tx,
            shutdown,
        ));

        Ok(Self {
            name: name.to_string(),
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.task.abort();
        debug!(process = %self.name, "Stopped watching for changes");
    }
}

async fn debounce_loop(
    name: String,
    filter: WatchFilter,
    mut debouncer: Debouncer,
    mut raw_rx: mpsc::UnboundedReceiver<Event>,
    trigger_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
) {
    loop {
        let deadline = debouncer.deadline();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = raw_rx.recv() => match event {
                Some(event) => {
                    if filter.is_relevant(&event) {
                        debug!(process = %name, kind = ?event.kind, paths = ?event.paths, "File change");
                        debouncer.note(Instant::now());
                    }
                }
                None => break,
            },
            _ = sleep_until(deadline) => {
                if debouncer.poll(Instant::now()) {
                    info!(process = %name, "Changes settled, requesting restart");
                    // A full channel already holds a pending restart
                    let _ = trigger_tx.try_send(());
                }
            }
        }
    }

    debug!(process = %name, "Watcher stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
