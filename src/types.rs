use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use ::time::{format_description::well_known, OffsetDateTime};

use crate::rules::ScanRule;

/// One `host:port` pair to probe. Ordered address-then-port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointCandidate {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl EndpointCandidate {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self { host, port }
    }

    /// Status page URL for this endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl fmt::Display for EndpointCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub candidate: EndpointCandidate,
    pub matched: bool,
}

/// A labelled stream URL read from a candidate list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamCandidate {
    pub label: String,
    pub url: String,
}

impl StreamCandidate {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }

    pub fn is_udp(&self) -> bool {
        self.url.starts_with("udp://")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StabilityVerdict {
    pub label: String,
    pub url: String,
    pub stable: bool,
    pub attempts: u32,
}

/// Result of scanning one configured rule.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanOutcome {
    pub rule: ScanRule,
    pub scanned_total: u64,
    pub scanned_done: u64,
    pub aborted: bool,
    pub matches: Vec<EndpointCandidate>,
}

/// Per-province discovery summary.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProvinceSummary {
    pub province: String,
    pub rules_scanned: usize,
    pub candidates_scanned: u64,
    pub endpoints: Vec<EndpointCandidate>,
    pub output: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DiscoveryReport {
    pub generated_at: String,
    pub provinces: Vec<ProvinceSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerifyReport {
    pub generated_at: String,
    pub total: usize,
    pub stable: usize,
    pub verdicts: Vec<StabilityVerdict>,
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
