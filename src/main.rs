use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use gateway_scan::batch::{self, FrameProbeCheck, DEFAULT_STREAM_CONCURRENCY};
use gateway_scan::config;
use gateway_scan::monitor::{MonitorConfig, StreamHealthMonitor};
use gateway_scan::probe::HttpGatewayProbe;
use gateway_scan::probe_process::ProbeCommand;
use gateway_scan::retry::{RetryPolicy, RetryScheduler};
use gateway_scan::scanner::ProbeScanner;
use gateway_scan::types::{now_rfc3339, DiscoveryReport};

/// gateway-scan: discover multicast gateways on a provider network and verify their streams.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gateway-scan",
    version,
    about = "Discover multicast-to-unicast gateways and verify stream stability.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan every `<province>_config.txt` in the ip directory for gateway status pages.
    Discover(DiscoverArgs),
    /// Check each `label,url` stream with a decode probe and keep the stable ones.
    Verify(VerifyArgs),
}

#[derive(Debug, Clone, clap::Args)]
struct DiscoverArgs {
    /// Directory holding `*_config.txt` files; `<province>_ip.txt` results are written here.
    #[arg(long = "ip-dir", default_value = "ip")]
    ip_dir: PathBuf,

    /// Per-probe HTTP timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 3000)]
    timeout_ms: u64,

    /// Seconds between progress lines on long sweeps.
    #[arg(long = "progress-secs", default_value_t = 30)]
    progress_secs: u64,

    /// Write a JSON summary to this path (optional).
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, clap::Args)]
struct VerifyArgs {
    /// Stream list, one `label,url` per line.
    #[arg(long, default_value = "HB.txt")]
    input: PathBuf,

    /// Where stable `label,url` lines are written.
    #[arg(long, default_value = "DL.txt")]
    output: PathBuf,

    /// Decode-probe executable.
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Observation window per attempt, in seconds.
    #[arg(long = "duration-secs", default_value_t = 10)]
    duration_secs: u64,

    /// Additional attempts after a failed one.
    #[arg(long, default_value_t = 1)]
    retries: u32,

    /// Overall time budget per stream, in seconds.
    #[arg(long = "total-timeout-secs", default_value_t = 15)]
    total_timeout_secs: u64,

    /// Streams checked at the same time.
    #[arg(long, default_value_t = DEFAULT_STREAM_CONCURRENCY)]
    concurrency: usize,

    /// Seconds without a new frame timestamp before a stream counts as stalled.
    #[arg(long = "stall-grace-secs", default_value_t = 5)]
    stall_grace_secs: u64,

    /// Seconds a frame timestamp may step backwards before it counts as a reconnect.
    #[arg(long = "regression-tolerance", default_value_t = 1.0)]
    regression_tolerance: f64,

    /// Write a JSON summary to this path (optional).
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Discover(args) => run_discover(args).await,
        Command::Verify(args) => run_verify(args).await,
    }
}

async fn run_discover(args: DiscoverArgs) -> Result<()> {
    println!("gateway-scan discover configuration:");
    println!("  ip_dir       : {}", args.ip_dir.display());
    println!("  timeout_ms   : {}", args.timeout_ms);
    println!("  progress_secs: {}", args.progress_secs);
    println!("  report       : {}", display_opt(args.report.as_deref()));

    std::fs::create_dir_all(&args.ip_dir)
        .with_context(|| format!("failed to create {}", args.ip_dir.display()))?;

    let probe = HttpGatewayProbe::new(Duration::from_millis(args.timeout_ms))
        .context("failed to build HTTP client")?;
    let scanner = ProbeScanner::new(Arc::new(probe))
        .with_progress_interval(Duration::from_secs(args.progress_secs.max(1)));

    let provinces = batch::discover_all(&scanner, &args.ip_dir).await?;

    println!("\nProvinces scanned: {}", provinces.len());
    for p in &provinces {
        println!(
            "  {:<16} rules: {:>3}  scanned: {:>6}  gateways: {:>4}  {}",
            p.province,
            p.rules_scanned,
            p.candidates_scanned,
            p.endpoints.len(),
            p.output
                .as_ref()
                .map(|o| o.display().to_string())
                .unwrap_or_default()
        );
    }

    if let Some(path) = args.report.as_deref() {
        let report = DiscoveryReport {
            generated_at: now_rfc3339(),
            provinces,
        };
        write_report(path, &report);
    }
    Ok(())
}

async fn run_verify(args: VerifyArgs) -> Result<()> {
    println!("gateway-scan verify configuration:");
    println!("  input        : {}", args.input.display());
    println!("  output       : {}", args.output.display());
    println!("  ffprobe      : {}", args.ffprobe.display());
    println!("  duration_secs: {}", args.duration_secs);
    println!("  retries      : {}", args.retries);
    println!("  total_timeout: {}s", args.total_timeout_secs);
    println!("  concurrency  : {}", args.concurrency);
    println!("  report       : {}", display_opt(args.report.as_deref()));

    let command = ProbeCommand {
        program: args.ffprobe.clone(),
        ..ProbeCommand::default()
    };
    let version = command
        .check_available()
        .await
        .context("decode probe check failed")?;
    println!("Decode probe available: {version}");

    let candidates = config::load_stream_candidates_from_path(&args.input)?;
    if candidates.is_empty() {
        println!("No valid stream addresses to test");
        return Ok(());
    }
    println!("Parsed {} stream addresses", candidates.len());

    let monitor = StreamHealthMonitor::new(
        command,
        MonitorConfig {
            window: Duration::from_secs(args.duration_secs),
            stall_grace: Duration::from_secs(args.stall_grace_secs),
            regression_tolerance: args.regression_tolerance,
            ..MonitorConfig::default()
        },
    );
    let retry = RetryScheduler::new(RetryPolicy {
        retries: args.retries,
        total_timeout: Duration::from_secs(args.total_timeout_secs),
    });
    let checker = Arc::new(FrameProbeCheck::new(monitor, retry));

    let verdicts = batch::verify_streams(&candidates, checker, args.concurrency).await;
    let stable = verdicts.iter().filter(|v| v.stable).count();

    println!("\nStreams tested: {}", verdicts.len());
    println!("Stable streams: {}", stable);

    let failed = batch::write_verify_outputs(&args.output, args.report.as_deref(), verdicts);
    if failed > 0 {
        anyhow::bail!("{failed} output(s) could not be written");
    }
    Ok(())
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

fn write_report<T: Serialize>(path: &Path, report: &T) {
    if let Err(e) = batch::write_json_report(path, report) {
        eprintln!("Failed to write JSON to {}: {e:#}", path.display());
    } else {
        println!("Wrote JSON report to {}", path.display());
    }
}
