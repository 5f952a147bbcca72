use anyhow::{anyhow, Context, Result};
use encoding_rs::GBK;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Error;
use crate::rules::{BasePrefix, ScanRule};
use crate::types::StreamCandidate;

/// Suffix that marks a province rule-config file inside the ip directory.
pub const CONFIG_SUFFIX: &str = "_config.txt";

/// One `base_ip:port,rule_code` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleConfig {
    pub prefix: BasePrefix,
    pub port: u16,
    pub rule: ScanRule,
}

impl RuleConfig {
    /// Status URL of the rule's display host, used in log lines.
    pub fn display_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.rule.display_host(&self.prefix),
            self.port,
            self.rule.probe_path()
        )
    }
}

/// Parse one config line. Callers filter comments and comma-less lines first.
pub fn parse_rule_line(line: &str, line_no: usize) -> std::result::Result<RuleConfig, Error> {
    let bad = |reason: String| Error::InvalidConfigLine {
        line: line_no,
        reason,
    };
    let mut fields = line.trim().split(',');
    let endpoint = fields.next().unwrap_or("").trim();
    let code = fields
        .next()
        .map(str::trim)
        .ok_or_else(|| bad("missing rule code".into()))?;

    let (ip, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| bad(format!("expected base_ip:port, got `{endpoint}`")))?;
    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| bad(format!("invalid port `{port}`")))?;
    if port == 0 {
        return Err(bad("port out of range: 0".into()));
    }
    let code: u8 = code
        .parse()
        .map_err(|_| bad(format!("invalid rule code `{code}`")))?;
    let rule = ScanRule::try_from(code).map_err(|e| bad(e.to_string()))?;
    let prefix = BasePrefix::parse(ip).map_err(|e| bad(e.to_string()))?;

    Ok(RuleConfig { prefix, port, rule })
}

/// Parse a rule-config file's content.
///
/// - lines starting with `#` are comments
/// - lines without a comma are ignored
/// - malformed lines are logged and skipped
///
/// The result is deduplicated and sorted.
pub fn parse_rule_configs_str(s: &str) -> Vec<RuleConfig> {
    let mut out = BTreeSet::new();
    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        if raw_line.starts_with('#') || !raw_line.contains(',') {
            continue;
        }
        match parse_rule_line(raw_line, line_no) {
            Ok(cfg) => {
                info!(line = line_no, url = %cfg.display_url(), rule = %cfg.rule, "added to scan list");
                out.insert(cfg);
            }
            Err(e) => warn!("skipping config {e}"),
        }
    }
    out.into_iter().collect()
}

pub fn load_rule_configs_from_path(path: impl AsRef<Path>) -> Result<Vec<RuleConfig>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
    Ok(parse_rule_configs_str(&content))
}

/// List `*_config.txt` files in a directory, sorted by name.
pub fn find_config_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir.as_ref())
        .with_context(|| format!("failed to list directory: {}", dir.as_ref().display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_config = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(CONFIG_SUFFIX))
            .unwrap_or(false);
        if is_config && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Province name of a config file: the file name up to its first `_`.
pub fn province_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.split('_').next().unwrap_or(name).to_string()
}

/// Parse a `label,url` stream list.
///
/// The label is everything before the last comma, so labels may themselves contain commas.
/// A line without a comma is a bare URL. Empty labels become `channel<line-no>`.
/// Only `http://` and `udp://` URLs are kept; anything else is logged and skipped.
pub fn parse_stream_candidates_str(s: &str) -> Vec<StreamCandidate> {
    let mut out = Vec::new();
    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let (label, url) = match line.rsplit_once(',') {
            Some((label, url)) => (label.trim(), url.trim()),
            None => ("", line),
        };
        if !(url.starts_with("http://") || url.starts_with("udp://")) {
            warn!(line = line_no, "invalid stream address, skipping: {url}");
            continue;
        }
        let label = if label.is_empty() {
            format!("channel{line_no}")
        } else {
            label.to_string()
        };
        out.push(StreamCandidate::new(label, url));
    }
    out
}

/// Decode a stream list as UTF-8, falling back to GBK for lists saved by Windows tools.
///
/// Returns the text and the name of the encoding that worked.
pub fn decode_stream_list(bytes: &[u8]) -> Result<(Cow<'_, str>, &'static str)> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok((Cow::Borrowed(text), "UTF-8"));
    }
    GBK.decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| (text, GBK.name()))
        .ok_or_else(|| anyhow!("stream list is neither valid UTF-8 nor GBK"))
}

pub fn load_stream_candidates_from_path(path: impl AsRef<Path>) -> Result<Vec<StreamCandidate>> {
    let path = path.as_ref();
    let bytes =
        fs::read(path).with_context(|| format!("failed to read stream list: {}", path.display()))?;
    let (content, encoding) = decode_stream_list(&bytes)
        .with_context(|| format!("failed to decode stream list: {}", path.display()))?;
    let candidates = parse_stream_candidates_str(&content);
    info!(encoding, count = candidates.len(), "parsed stream list {}", path.display());
    Ok(candidates)
}
