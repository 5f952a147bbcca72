#![cfg(unix)]

use gateway_scan::monitor::{MonitorConfig, Outcome, StreamHealthMonitor};
use gateway_scan::probe_process::ProbeCommand;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Write `body` as a shell script and build a monitor that runs it in place of the decode probe.
/// The script receives the probe arguments and ignores them.
fn fake_probe(dir: &TempDir, body: &str, config: MonitorConfig) -> StreamHealthMonitor {
    let script = dir.path().join("fake-probe.sh");
    std::fs::write(&script, body).unwrap();
    StreamHealthMonitor::new(sh_command(&script), config)
}

fn sh_command(script: &Path) -> ProbeCommand {
    ProbeCommand {
        program: "/bin/sh".into(),
        leading_args: vec![script.display().to_string()],
        ..ProbeCommand::default()
    }
}

fn config(window_ms: u64, grace_ms: u64) -> MonitorConfig {
    MonitorConfig {
        window: Duration::from_millis(window_ms),
        stall_grace: Duration::from_millis(grace_ms),
        ..MonitorConfig::default()
    }
}

fn assert_reaped(pid: Option<u32>) {
    let pid = Pid::from_raw(pid.expect("process was spawned") as i32);
    assert_eq!(kill(pid, None::<Signal>), Err(Errno::ESRCH));
}

#[tokio::test]
async fn increasing_timestamps_over_the_window_are_stable() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = fake_probe(
        &dir,
        "i=0\nwhile [ $i -lt 100 ]; do echo \"$i.040000\"; i=$((i+1)); sleep 0.1; done\n",
        config(2_000, 1_000),
    );

    let obs = monitor.observe("udp://239.1.1.1:1234").await;

    assert_eq!(obs.outcome, Outcome::Completed);
    assert!(obs.is_stable());
    assert!(obs.samples > 5);
    assert_reaped(obs.pid);
}

#[tokio::test]
async fn timestamp_rewind_is_unstable_and_process_is_terminated() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = fake_probe(
        &dir,
        "echo 1.0\necho 2.0\necho 3.0\necho 1.0\nsleep 30\n",
        config(5_000, 5_000),
    );

    let started = Instant::now();
    let obs = monitor.observe("http://10.0.0.1:4022/rtp/239.0.0.1:5140").await;

    assert_eq!(
        obs.outcome,
        Outcome::Regression {
            previous: 3.0,
            current: 1.0
        }
    );
    assert!(!obs.is_stable());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_reaped(obs.pid);
}

#[tokio::test]
async fn no_new_timestamps_is_a_stall() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = fake_probe(&dir, "echo 0.0\necho 0.5\nsleep 30\n", config(5_000, 1_000));

    let started = Instant::now();
    let obs = monitor.observe("udp://239.1.1.2:1234").await;

    assert_eq!(obs.outcome, Outcome::NoProgress);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_reaped(obs.pid);
}

#[tokio::test]
async fn silent_process_stalls_after_the_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = fake_probe(&dir, "sleep 30\n", config(5_000, 1_000));

    let started = Instant::now();
    let obs = monitor.observe("udp://239.1.1.7:1234").await;

    assert_eq!(obs.outcome, Outcome::NoProgress);
    assert_eq!(obs.samples, 0);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_reaped(obs.pid);
}

#[tokio::test]
async fn repeated_timestamps_do_not_count_as_progress() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = fake_probe(
        &dir,
        "echo 4.0\nwhile true; do echo 4.0; sleep 0.1; done\n",
        config(5_000, 1_000),
    );

    let obs = monitor.observe("udp://239.1.1.3:1234").await;

    assert_eq!(obs.outcome, Outcome::NoProgress);
    assert_reaped(obs.pid);
}

#[tokio::test]
async fn early_exit_is_unstable() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = fake_probe(&dir, "echo 0.0\necho 0.1\nexit 0\n", config(3_000, 2_000));

    let obs = monitor.observe("udp://239.1.1.4:1234").await;

    assert!(matches!(
        obs.outcome,
        Outcome::ProcessExited | Outcome::StreamEnded
    ));
    assert!(!obs.is_stable());
}

#[tokio::test]
async fn garbage_lines_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = fake_probe(
        &dir,
        "echo N/A\necho garbage\ni=0\nwhile [ $i -lt 100 ]; do echo \"$i\"; echo; i=$((i+1)); sleep 0.1; done\n",
        config(1_500, 1_000),
    );

    let obs = monitor.observe("udp://239.1.1.5:1234").await;

    assert!(obs.is_stable());
}

#[tokio::test]
async fn missing_executable_is_unstable() {
    let monitor = StreamHealthMonitor::new(
        ProbeCommand {
            program: "/nonexistent/decode-probe".into(),
            ..ProbeCommand::default()
        },
        config(1_000, 1_000),
    );

    let obs = monitor.observe("udp://239.1.1.6:1234").await;

    assert_eq!(obs.outcome, Outcome::SpawnFailed);
    assert!(obs.pid.is_none());
}

#[tokio::test]
async fn probe_receives_the_decode_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let body = format!(
        "echo \"$@\" > '{}'\ni=0\nwhile [ $i -lt 100 ]; do echo \"$i\"; i=$((i+1)); sleep 0.1; done\n",
        args_file.display()
    );
    let monitor = fake_probe(&dir, &body, config(500, 1_000));

    let obs = monitor.observe("udp://239.9.9.9:5000").await;
    assert!(obs.is_stable());

    let args = std::fs::read_to_string(&args_file).unwrap();
    assert!(args.contains("-show_entries frame=pkt_pts_time"));
    assert!(args.contains("-timeout 500000"));
    assert!(args.contains("-stimeout 5000000"));
    assert!(args.contains("-i udp://239.9.9.9:5000"));
}
