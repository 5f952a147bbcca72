use std::process::ExitStatus;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::probe_process::{ProbeCommand, ProbeProcessHandle, DEFAULT_TERMINATE_GRACE};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_STALL_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_REGRESSION_TOLERANCE: f64 = 1.0;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Observation window; the stream is stable if it survives this long.
    pub window: Duration,
    /// Longest gap allowed without a timestamp beyond the last one.
    pub stall_grace: Duration,
    /// Seconds a timestamp may step backwards before it counts as a reconnect.
    pub regression_tolerance: f64,
    pub terminate_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            stall_grace: DEFAULT_STALL_GRACE,
            regression_tolerance: DEFAULT_REGRESSION_TOLERANCE,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// How an observation window ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Completed,
    SpawnFailed,
    ProcessExited,
    StreamEnded,
    ReadError,
    Regression { previous: f64, current: f64 },
    NoProgress,
}

#[derive(Debug)]
pub struct Observation {
    pub outcome: Outcome,
    pub samples: u64,
    pub pid: Option<u32>,
    pub exit_status: Option<ExitStatus>,
}

impl Observation {
    pub fn is_stable(&self) -> bool {
        self.outcome == Outcome::Completed
    }
}

/// Classification of one telemetry line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Advanced(f64),
    Repeated(f64),
    Regressed { previous: f64, current: f64 },
    Unparsed,
}

/// Tracks the last frame timestamp and classifies each new line against it.
#[derive(Debug, Clone)]
pub struct TimestampTracker {
    last: Option<f64>,
    tolerance: f64,
}

impl TimestampTracker {
    pub fn new(tolerance: f64) -> Self {
        Self {
            last: None,
            tolerance,
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn push(&mut self, line: &str) -> Sample {
        let value = line.trim().trim_end_matches(',');
        let current = match value.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => return Sample::Unparsed,
        };
        match self.last {
            Some(previous) if current < previous - self.tolerance => {
                Sample::Regressed { previous, current }
            }
            Some(previous) if current <= previous => {
                self.last = Some(current);
                Sample::Repeated(current)
            }
            _ => {
                self.last = Some(current);
                Sample::Advanced(current)
            }
        }
    }
}

/// Watches one stream for a single observation window.
#[derive(Debug, Clone, Default)]
pub struct StreamHealthMonitor {
    command: ProbeCommand,
    config: MonitorConfig,
}

impl StreamHealthMonitor {
    pub fn new(command: ProbeCommand, config: MonitorConfig) -> Self {
        Self { command, config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Spawn the decode probe against `url`, watch its telemetry, and always shut it down.
    pub async fn observe(&self, url: &str) -> Observation {
        let mut handle = match self.command.spawn(url, self.config.window) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%url, "failed to start decode probe: {e}");
                return Observation {
                    outcome: Outcome::SpawnFailed,
                    samples: 0,
                    pid: None,
                    exit_status: None,
                };
            }
        };
        let pid = handle.id();
        let mut samples = 0;
        let outcome = self.watch(&mut handle, &mut samples).await;
        let exit_status = handle.shutdown(self.config.terminate_grace).await;
        debug!(%url, ?outcome, samples, "observation finished");

        Observation {
            outcome,
            samples,
            pid,
            exit_status,
        }
    }

    async fn watch(&self, handle: &mut ProbeProcessHandle, samples: &mut u64) -> Outcome {
        let cfg = &self.config;
        let started = Instant::now();
        let deadline = started + cfg.window;
        let mut tracker = TimestampTracker::new(cfg.regression_tolerance);
        let mut last_advance = started;

        loop {
            if Instant::now() >= deadline {
                return Outcome::Completed;
            }
            match handle.exited() {
                Ok(Some(status)) => {
                    debug!(%status, "decode probe exited before the window elapsed");
                    return Outcome::ProcessExited;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to poll decode probe: {e}");
                    return Outcome::ReadError;
                }
            }

            tokio::select! {
                line = handle.next_line() => match line {
                    Ok(Some(line)) => match tracker.push(&line) {
                        Sample::Advanced(_) => {
                            *samples += 1;
                            last_advance = Instant::now();
                        }
                        Sample::Repeated(_) => *samples += 1,
                        Sample::Regressed { previous, current } => {
                            return Outcome::Regression { previous, current };
                        }
                        Sample::Unparsed => {
                            if !line.trim().is_empty() {
                                debug!("ignoring telemetry line: {line}");
                            }
                        }
                    },
                    Ok(None) => return Outcome::StreamEnded,
                    Err(e) => {
                        warn!("failed to read decode probe output: {e}");
                        return Outcome::ReadError;
                    }
                },
                _ = time::sleep(cfg.poll_interval) => {}
            }

            if last_advance.elapsed() > cfg.stall_grace && Instant::now() < deadline {
                return Outcome::NoProgress;
            }
        }
    }
}
