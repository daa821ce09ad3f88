use crate::config::{ProcessSpec, SupervisorSettings};
use std::time::{Duration, Instant};

/// Restart policy for one spec
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether relaunch after exit is enabled
    pub enabled: bool,
    /// Maximum number of restarts within the time window, unlimited when `None`
    pub max_restarts: Option<usize>,
    /// Time window for counting restarts
    pub window: Duration,
    /// Delay before the first restart
    pub initial_delay: Duration,
    /// Ceiling for the exponential backoff
    pub max_delay: Duration,
    /// Runs at least this long reset the crash backoff
    pub min_uptime: Duration,
}

impl RestartPolicy {
    /// Build the policy for `spec`, falling back to the supervisor defaults
    pub fn for_spec(spec: &ProcessSpec, settings: &SupervisorSettings) -> Self {
        Self {
            enabled: spec.autorestart,
            max_restarts: spec.max_restarts,
            window: Duration::from_secs(settings.restart_window_secs),
            initial_delay: Duration::from_millis(
                spec.restart_delay_ms.unwrap_or(settings.restart_delay_ms),
            ),
            max_delay: Duration::from_millis(settings.max_restart_delay_ms),
            min_uptime: settings.min_uptime(),
        }
    }

    /// Check if a relaunch after exit should be attempted based on restart history
    ///
    /// Restarts that fell out of the window are forgotten first, so the
    /// history never holds more than one window's worth of entries.
    pub fn should_restart(&self, tracker: &mut RestartTracker) -> bool {
        tracker.prune_old_restarts(self.window);

        if !self.enabled {
            return false;
        }

        match self.max_restarts {
            Some(max) => tracker.restart_count() < max,
            None => true,
        }
    }

    /// Delay before the next relaunch after an exit
    pub fn calculate_delay(&self, tracker: &RestartTracker) -> Duration {
        self.backoff(tracker.consecutive_crashes())
    }

    /// Delay before launch attempt number `attempt` (zero-based) is retried
    pub fn launch_retry_delay(&self, attempt: usize) -> Duration {
        self.backoff(attempt)
    }

    /// `initial_delay * 2^attempt`, capped at `max_delay`
    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(31) as u32);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Tracks restart history for a process
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    /// Timestamps of restarts, oldest first
    restart_times: Vec<Instant>,
    /// Exits in a row that came before `min_uptime`
    consecutive_crashes: usize,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_restart(&mut self) {
        self.restart_times.push(Instant::now());
    }

    /// Account for a finished run; a short run feeds the backoff, a long one resets it
    pub fn record_run(&mut self, uptime: Duration, min_uptime: Duration) {
        if uptime >= min_uptime {
            self.consecutive_crashes = 0;
        } else {
            self.consecutive_crashes += 1;
        }
    }

    /// Restarts still on record; see [`RestartPolicy::should_restart`]
    pub fn restart_count(&self) -> usize {
        self.restart_times.len()
    }

    pub fn consecutive_crashes(&self) -> usize {
        self.consecutive_crashes
    }

    /// Remove restart records older than the window
    pub fn prune_old_restarts(&mut self, window: Duration) {
        let now = Instant::now();
        self.restart_times
            .retain(|&time| now.duration_since(time) < window);
    }
}
