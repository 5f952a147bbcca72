use ipnet::Ipv4AddrRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::types::EndpointCandidate;

/// Number of third-octet subnets swept when a multi-subnet prefix carries no explicit range.
pub const IMPLIED_SUBNET_SPAN: u8 = 8;

/// Which octets of the base prefix a rule varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepShape {
    /// Last octet 1..=255.
    Subnet,
    /// Third octet over a small range, last octet 1..=255.
    MultiSubnet,
    /// Third octet 0..=255, last octet 1..=255.
    FullSweep,
}

/// Enumerated scan patterns, keyed by their config code.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum ScanRule {
    StatSubnet,
    StatSweep,
    StatMultiSubnet,
    StatusSubnet,
    StatusFirstMatch,
    StatusMultiSubnet,
}

impl ScanRule {
    pub const ALL: [ScanRule; 6] = [
        ScanRule::StatSubnet,
        ScanRule::StatSweep,
        ScanRule::StatMultiSubnet,
        ScanRule::StatusSubnet,
        ScanRule::StatusFirstMatch,
        ScanRule::StatusMultiSubnet,
    ];

    pub fn code(self) -> u8 {
        match self {
            ScanRule::StatSubnet => 0,
            ScanRule::StatSweep => 1,
            ScanRule::StatMultiSubnet => 2,
            ScanRule::StatusSubnet => 10,
            ScanRule::StatusFirstMatch => 11,
            ScanRule::StatusMultiSubnet => 12,
        }
    }

    pub fn shape(self) -> SweepShape {
        match self {
            ScanRule::StatSubnet | ScanRule::StatusSubnet => SweepShape::Subnet,
            ScanRule::StatMultiSubnet | ScanRule::StatusMultiSubnet => SweepShape::MultiSubnet,
            ScanRule::StatSweep | ScanRule::StatusFirstMatch => SweepShape::FullSweep,
        }
    }

    pub fn probe_path(self) -> &'static str {
        if self.code() >= 10 {
            "/status"
        } else {
            "/stat"
        }
    }

    /// Whether the scan halts at the first positive probe.
    pub fn first_match(self) -> bool {
        matches!(self, ScanRule::StatusFirstMatch)
    }

    /// Worker pool size. Sweeps that are mostly negatives get the wider pool.
    pub fn workers(self) -> usize {
        if self.code() % 2 == 1 {
            250
        } else {
            150
        }
    }

    pub fn reports_progress(self) -> bool {
        self.code() % 2 == 1
    }

    /// Host shown for a configured rule: `a.b.c.1` for even codes, `a.b.1.1` for odd ones.
    pub fn display_host(self, prefix: &BasePrefix) -> Ipv4Addr {
        if self.code() % 2 == 0 {
            Ipv4Addr::new(prefix.a, prefix.b, prefix.third.start, 1)
        } else {
            Ipv4Addr::new(prefix.a, prefix.b, 1, 1)
        }
    }
}

impl TryFrom<u8> for ScanRule {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        ScanRule::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or(Error::InvalidRule(code))
    }
}

impl From<ScanRule> for u8 {
    fn from(rule: ScanRule) -> u8 {
        rule.code()
    }
}

impl fmt::Display for ScanRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Inclusive third-octet span written as `c` or `c1-c2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OctetSpan {
    pub start: u8,
    pub end: Option<u8>,
}

/// Base IPv4 prefix from a config line. The fourth octet is kept but no shape varies from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BasePrefix {
    pub a: u8,
    pub b: u8,
    pub third: OctetSpan,
    pub d: u8,
}

impl BasePrefix {
    /// Parse `a.b.c[.d]` where `c` may be a range `c1-c2`.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 && parts.len() != 4 {
            return Err(invalid());
        }
        let octet = |p: &str| p.trim().parse::<u8>().map_err(|_| invalid());

        let a = octet(parts[0])?;
        let b = octet(parts[1])?;
        let third = match parts[2].split_once('-') {
            Some((lo, hi)) => {
                let (start, end) = (octet(lo)?, octet(hi)?);
                if start > end {
                    return Err(invalid());
                }
                OctetSpan {
                    start,
                    end: Some(end),
                }
            }
            None => OctetSpan {
                start: octet(parts[2])?,
                end: None,
            },
        };
        let d = match parts.get(3) {
            Some(p) => octet(p)?,
            None => 0,
        };
        Ok(Self { a, b, third, d })
    }
}

impl fmt::Display for BasePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.third.end {
            Some(end) => write!(f, "{}.{}.{}-{}.{}", self.a, self.b, self.third.start, end, self.d),
            None => write!(f, "{}.{}.{}.{}", self.a, self.b, self.third.start, self.d),
        }
    }
}

/// Expand a prefix, port and rule into the ordered candidate list.
pub fn generate_candidates(
    prefix: &BasePrefix,
    port: u16,
    rule: ScanRule,
) -> Result<Vec<EndpointCandidate>> {
    let shape = rule.shape();
    if prefix.third.end.is_some() && shape != SweepShape::MultiSubnet {
        return Err(Error::InvalidAddress(format!(
            "{prefix}: third-octet range is only valid for multi-subnet rules (rule {rule})"
        )));
    }

    let (first, last) = match shape {
        SweepShape::Subnet => (prefix.third.start, prefix.third.start),
        SweepShape::MultiSubnet => {
            let start = prefix.third.start;
            let end = prefix
                .third
                .end
                .unwrap_or_else(|| start.saturating_add(IMPLIED_SUBNET_SPAN - 1));
            (start, end)
        }
        SweepShape::FullSweep => (0, 255),
    };

    let mut out = Vec::with_capacity((last as usize - first as usize + 1) * 255);
    for c in first..=last {
        out.extend(
            subnet_hosts(prefix.a, prefix.b, c).map(|host| EndpointCandidate::new(host, port)),
        );
    }
    Ok(out)
}

/// Last-octet sweep `a.b.c.1 ..= a.b.c.255`.
fn subnet_hosts(a: u8, b: u8, c: u8) -> Ipv4AddrRange {
    Ipv4AddrRange::new(Ipv4Addr::new(a, b, c, 1), Ipv4Addr::new(a, b, c, 255))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_four_and_three_octets() {
        let p = BasePrefix::parse("10.20.30.40").unwrap();
        assert_eq!((p.a, p.b, p.third.start, p.d), (10, 20, 30, 40));
        let p = BasePrefix::parse("10.20.30").unwrap();
        assert_eq!(p.d, 0);
    }

    #[test]
    fn parse_third_octet_range() {
        let p = BasePrefix::parse("1.2.5-9.1").unwrap();
        assert_eq!(
            p.third,
            OctetSpan {
                start: 5,
                end: Some(9)
            }
        );
        assert_eq!(p.to_string(), "1.2.5-9.1");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(BasePrefix::parse("1.2.3.4.5").is_err());
        assert!(BasePrefix::parse("1.2").is_err());
        assert!(BasePrefix::parse("1.2.300.4").is_err());
        assert!(BasePrefix::parse("1.2.9-5.4").is_err());
        assert!(BasePrefix::parse("a.b.c.d").is_err());
    }

    #[test]
    fn rule_codes_round_trip_and_reject_unknown() {
        for rule in ScanRule::ALL {
            assert_eq!(ScanRule::try_from(rule.code()).unwrap(), rule);
        }
        assert!(matches!(ScanRule::try_from(3), Err(Error::InvalidRule(3))));
        assert!(matches!(ScanRule::try_from(13), Err(Error::InvalidRule(13))));
    }

    #[test]
    fn rule_properties() {
        assert_eq!(ScanRule::StatSubnet.probe_path(), "/stat");
        assert_eq!(ScanRule::StatusSubnet.probe_path(), "/status");
        assert!(ScanRule::StatusFirstMatch.first_match());
        assert!(!ScanRule::StatSweep.first_match());
        assert_eq!(ScanRule::StatusFirstMatch.workers(), 250);
        assert_eq!(ScanRule::StatusMultiSubnet.workers(), 150);
        assert!(ScanRule::StatSweep.reports_progress());
        assert!(!ScanRule::StatMultiSubnet.reports_progress());
    }

    #[test]
    fn display_host_depends_on_parity() {
        let p = BasePrefix::parse("10.20.30.40").unwrap();
        assert_eq!(
            ScanRule::StatusSubnet.display_host(&p),
            Ipv4Addr::new(10, 20, 30, 1)
        );
        assert_eq!(
            ScanRule::StatusFirstMatch.display_host(&p),
            Ipv4Addr::new(10, 20, 1, 1)
        );
    }

    #[test]
    fn implied_multi_subnet_span_is_clamped() {
        let p = BasePrefix::parse("10.0.252.1").unwrap();
        let c = generate_candidates(&p, 80, ScanRule::StatMultiSubnet).unwrap();
        assert_eq!(c.len(), 4 * 255);
        assert_eq!(c.last().unwrap().host, Ipv4Addr::new(10, 0, 255, 255));
    }
}
