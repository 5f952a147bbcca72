//! Supervision of one external decode-probe process.
//!
//! The probe is asked to print one frame timestamp per line on stdout. The handle owns the child
//! and its line reader; `shutdown` sends SIGTERM, waits a grace period, then kills and reaps. If
//! the handle is dropped without `shutdown` (for example when an attempt is aborted) tokio's
//! kill-on-drop still delivers SIGKILL.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_millis(300);
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// How to invoke the decode-probe executable.
#[derive(Debug, Clone)]
pub struct ProbeCommand {
    pub program: PathBuf,
    /// Arguments placed before the probe arguments, for wrappers such as `nice` or a script.
    pub leading_args: Vec<String>,
    /// Network-level timeout added for `udp://` sources, which can block on connect forever.
    pub udp_timeout: Duration,
    pub show_entries: String,
}

impl Default for ProbeCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffprobe"),
            leading_args: Vec::new(),
            udp_timeout: DEFAULT_UDP_TIMEOUT,
            show_entries: "frame=pkt_pts_time".to_string(),
        }
    }
}

impl ProbeCommand {
    /// Argument list for observing `url` over `window`.
    pub fn args(&self, url: &str, window: Duration) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            self.show_entries.clone(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            "-timeout".to_string(),
            window.as_micros().to_string(),
        ]);
        if url.starts_with("udp://") {
            args.push("-stimeout".to_string());
            args.push(self.udp_timeout.as_micros().to_string());
        }
        args.extend(["-i".to_string(), url.to_string(), "-hide_banner".to_string()]);
        args
    }

    /// Run `<program> -version` and return its first output line.
    pub async fn check_available(&self) -> Result<String> {
        let fut = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = time::timeout(VERSION_CHECK_TIMEOUT, fut)
            .await
            .map_err(|_| {
                Error::ProbeUnavailable(format!("{} -version timed out", self.program.display()))
            })?
            .map_err(|e| Error::ProbeUnavailable(format!("{}: {e}", self.program.display())))?;
        if !output.status.success() {
            return Err(Error::ProbeUnavailable(format!(
                "{} -version exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    pub fn spawn(&self, url: &str, window: Duration) -> Result<ProbeProcessHandle> {
        let mut child = Command::new(&self.program)
            .args(self.args(url, window))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("probe stdout not captured")))?;
        debug!(pid = ?child.id(), %url, "decode probe spawned");
        Ok(ProbeProcessHandle {
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

/// Exclusive owner of one running decode-probe.
#[derive(Debug)]
pub struct ProbeProcessHandle {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ProbeProcessHandle {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status if the process has already ended.
    pub fn exited(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Next stdout line; `None` at end of stream. Cancel-safe.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }

    /// Terminate gracefully, then force-kill after `grace`, and reap the process.
    pub async fn shutdown(mut self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => {
                debug!(pid = ?self.child.id(), "decode probe ignored SIGTERM, killing");
                if let Err(e) = self.child.kill().await {
                    warn!("failed to kill decode probe: {e}");
                }
                self.child.try_wait().ok().flatten()
            }
        }
    }
}
