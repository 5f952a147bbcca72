//! Batch orchestration: stream verification across many candidates, and endpoint discovery across
//! many province config files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{self, RuleConfig};
use crate::monitor::StreamHealthMonitor;
use crate::retry::RetryScheduler;
use crate::rules;
use crate::scanner::ProbeScanner;
use crate::types::{
    now_rfc3339, EndpointCandidate, ProvinceSummary, StabilityVerdict, StreamCandidate,
    VerifyReport,
};

pub const DEFAULT_STREAM_CONCURRENCY: usize = 4;

/// A per-stream stability check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Returns `(stable, attempts)`.
    async fn check(&self, candidate: &StreamCandidate) -> (bool, u32);
}

/// Decode-probe observation wrapped in the retry scheduler.
#[derive(Debug, Clone)]
pub struct FrameProbeCheck {
    monitor: StreamHealthMonitor,
    retry: RetryScheduler,
}

impl FrameProbeCheck {
    pub fn new(monitor: StreamHealthMonitor, retry: RetryScheduler) -> Self {
        Self { monitor, retry }
    }
}

#[async_trait]
impl HealthCheck for FrameProbeCheck {
    async fn check(&self, candidate: &StreamCandidate) -> (bool, u32) {
        let url = candidate.url.clone();
        let outcome = self
            .retry
            .run(&candidate.label, |_| {
                let monitor = self.monitor.clone();
                let url = url.clone();
                async move { monitor.observe(&url).await.is_stable() }
            })
            .await;
        (outcome.stable, outcome.attempts)
    }
}

/// Check every candidate with at most `concurrency` checks in flight.
///
/// Verdicts are logged as they complete and returned in input order.
pub async fn verify_streams(
    candidates: &[StreamCandidate],
    checker: Arc<dyn HealthCheck>,
    concurrency: usize,
) -> Vec<StabilityVerdict> {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();

    for (idx, candidate) in candidates.iter().cloned().enumerate() {
        let sem = sem.clone();
        let checker = checker.clone();
        set.spawn(async move {
            // The semaphore is never closed.
            let _permit = sem.acquire_owned().await.ok();
            let (stable, attempts) = checker.check(&candidate).await;
            (idx, candidate, stable, attempts)
        });
    }

    let mut slots: Vec<Option<StabilityVerdict>> = vec![None; candidates.len()];
    while let Some(res) = set.join_next().await {
        match res {
            Ok((idx, candidate, stable, attempts)) => {
                if stable {
                    info!(label = %candidate.label, url = %candidate.url, attempts, "stable");
                } else {
                    info!(label = %candidate.label, url = %candidate.url, attempts, "unstable, timed out or invalid");
                }
                slots[idx] = Some(StabilityVerdict {
                    label: candidate.label,
                    url: candidate.url,
                    stable,
                    attempts,
                });
            }
            Err(e) => warn!("stream check task failed: {e}"),
        }
    }

    // A panicked check leaves its slot empty and counts as unstable.
    slots
        .into_iter()
        .zip(candidates)
        .map(|(slot, c)| {
            slot.unwrap_or_else(|| StabilityVerdict {
                label: c.label.clone(),
                url: c.url.clone(),
                stable: false,
                attempts: 0,
            })
        })
        .collect()
}

/// `label,url` lines for stable verdicts, in input order.
pub fn render_stable_list(verdicts: &[StabilityVerdict]) -> String {
    verdicts
        .iter()
        .filter(|v| v.stable)
        .map(|v| format!("{},{}\n", v.label, v.url))
        .collect()
}

pub fn write_stable_list(path: impl AsRef<Path>, verdicts: &[StabilityVerdict]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    fs::write(path, render_stable_list(verdicts))
        .with_context(|| format!("failed to write stable list: {}", path.display()))
}

/// Pretty-printed JSON, creating the parent directory if needed.
pub fn write_json_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let file = File::create(path)
        .with_context(|| format!("failed to create report: {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("failed to write report: {}", path.display()))?;
    Ok(())
}

/// Write the stable list and, when `report` is set, the JSON report.
///
/// Each output is written independently; a failure is logged and the other is still attempted.
/// Returns the number of outputs that could not be written.
pub fn write_verify_outputs(
    output: &Path,
    report: Option<&Path>,
    verdicts: Vec<StabilityVerdict>,
) -> usize {
    let mut failed = 0;
    match write_stable_list(output, &verdicts) {
        Ok(()) => info!("stable streams written to {}", output.display()),
        Err(e) => {
            error!("{e:#}");
            failed += 1;
        }
    }

    if let Some(path) = report {
        let stable = verdicts.iter().filter(|v| v.stable).count();
        let report = VerifyReport {
            generated_at: now_rfc3339(),
            total: verdicts.len(),
            stable,
            verdicts,
        };
        match write_json_report(path, &report) {
            Ok(()) => info!("JSON report written to {}", path.display()),
            Err(e) => {
                error!("{e:#}");
                failed += 1;
            }
        }
    }
    failed
}

/// Scan each configured rule in turn and return the deduplicated, sorted union of matches.
///
/// A rule finishes, session teardown included, before the next one starts.
pub async fn scan_rules(
    scanner: &ProbeScanner,
    configs: &[RuleConfig],
) -> (Vec<EndpointCandidate>, u64) {
    let mut found = Vec::new();
    let mut scanned = 0u64;

    for cfg in configs {
        info!(rule = %cfg.rule, "scanning {}", cfg.display_url());
        let candidates = match rules::generate_candidates(&cfg.prefix, cfg.port, cfg.rule) {
            Ok(c) => c,
            Err(e) => {
                warn!("skipping rule {}: {e}", cfg.rule);
                continue;
            }
        };
        if candidates.is_empty() {
            warn!("no candidates generated for {}:{}", cfg.prefix, cfg.port);
            continue;
        }
        match scanner.scan(cfg.rule, &candidates).await {
            Ok(outcome) => {
                scanned += outcome.scanned_done;
                if outcome.matches.is_empty() {
                    info!(rule = %cfg.rule, "no gateway found");
                } else if cfg.rule.first_match() {
                    info!(rule = %cfg.rule, "first gateway {}, rule done", outcome.matches[0]);
                } else {
                    info!(rule = %cfg.rule, "scan complete, {} gateways found", outcome.matches.len());
                }
                found.extend(outcome.matches);
            }
            Err(e) => error!(rule = %cfg.rule, "scan failed: {e:#}"),
        }
    }

    found.sort();
    found.dedup();
    (found, scanned)
}

/// One `host:port` per line.
pub fn render_endpoint_list(endpoints: &[EndpointCandidate]) -> String {
    endpoints
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Discover gateways for one `<province>_config.txt` and write `<province>_ip.txt` next to it.
pub async fn discover_province(
    scanner: &ProbeScanner,
    config_path: &Path,
    out_dir: &Path,
) -> Result<ProvinceSummary> {
    let province = config::province_from_path(config_path);
    info!(%province, "reading config {}", config_path.display());
    let configs = config::load_rule_configs_from_path(config_path)?;
    info!(%province, "{} rule groups to scan", configs.len());

    let (endpoints, scanned) = scan_rules(scanner, &configs).await;
    let mut summary = ProvinceSummary {
        province: province.clone(),
        rules_scanned: configs.len(),
        candidates_scanned: scanned,
        endpoints,
        output: None,
    };

    if summary.endpoints.is_empty() {
        info!(%province, "scan finished, no gateway found");
        return Ok(summary);
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output dir: {}", out_dir.display()))?;
    let out_path = out_dir.join(format!("{province}_ip.txt"));
    fs::write(&out_path, render_endpoint_list(&summary.endpoints))
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    info!(%province, count = summary.endpoints.len(), "gateways saved to {}", out_path.display());
    summary.output = Some(out_path);
    Ok(summary)
}

/// Run discovery for every config file in `ip_dir`, one after another.
///
/// A province that fails is logged and the rest still run.
pub async fn discover_all(scanner: &ProbeScanner, ip_dir: &Path) -> Result<Vec<ProvinceSummary>> {
    let files = config::find_config_files(ip_dir)?;
    if files.is_empty() {
        warn!("no *{} files found in {}", config::CONFIG_SUFFIX, ip_dir.display());
    }
    let mut summaries = Vec::with_capacity(files.len());
    for file in files {
        match discover_province(scanner, &file, ip_dir).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => error!("province {} failed: {e:#}", file.display()),
        }
    }
    Ok(summaries)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
