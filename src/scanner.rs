use crate::probe::GatewayProbe;
use crate::progress::{self, DEFAULT_PROGRESS_INTERVAL};
use crate::rules::ScanRule;
use crate::session::ScanSession;
use crate::types::{EndpointCandidate, ScanOutcome};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{info, warn};

/// How long the scanner waits for the progress task after signalling it.
const REPORTER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Fans candidate endpoints out over a bounded pool of probe tasks.
///
/// - Pool size comes from the rule.
/// - First-match rules stop submitting once a gateway is found; in-flight probes drain, and
///   probes that have not started yet see the abort flag and return without probing.
/// - Collect-all rules probe every candidate and keep every match.
/// - Every call builds its own `ScanSession`, so nothing carries over between rules.
#[derive(Clone)]
pub struct ProbeScanner {
    probe: Arc<dyn GatewayProbe>,
    progress_interval: Duration,
}

impl ProbeScanner {
    pub fn new(probe: Arc<dyn GatewayProbe>) -> Self {
        Self {
            probe,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub async fn scan(&self, rule: ScanRule, candidates: &[EndpointCandidate]) -> Result<ScanOutcome> {
        let session = Arc::new(ScanSession::new(candidates.len() as u64));
        let reporter = rule
            .reports_progress()
            .then(|| progress::spawn_reporter(session.clone(), self.progress_interval));

        let result = self.run_pool(rule, candidates, &session).await;

        session.finish();
        if let Some(handle) = reporter {
            let _ = time::timeout(REPORTER_JOIN_TIMEOUT, handle).await;
        }
        result?;

        let matches = if rule.first_match() {
            session.first_found().await.into_iter().collect()
        } else {
            session.take_matches().await
        };

        Ok(ScanOutcome {
            rule,
            scanned_total: session.total(),
            scanned_done: session.checked(),
            aborted: session.is_aborted(),
            matches,
        })
    }

    async fn run_pool(
        &self,
        rule: ScanRule,
        candidates: &[EndpointCandidate],
        session: &Arc<ScanSession>,
    ) -> Result<()> {
        let first_match = rule.first_match();
        let path = rule.probe_path();
        let sem = Arc::new(Semaphore::new(rule.workers()));
        let mut set = JoinSet::new();

        for &candidate in candidates {
            if first_match && session.is_aborted() {
                break;
            }
            let permit = tokio::select! {
                permit = sem.clone().acquire_owned() => permit.context("probe pool closed")?,
                _ = session.abort_token().cancelled(), if first_match => break,
            };
            let probe = self.probe.clone();
            let session = session.clone();

            set.spawn(async move {
                let _permit = permit;

                if first_match && session.is_aborted() {
                    return;
                }

                let result = probe.probe(candidate, path).await;
                if result.matched {
                    info!("{} gateway found", candidate.url(path));
                    if first_match {
                        if session.record_first(candidate).await {
                            info!(rule = %rule, "first gateway {candidate}, stopping submissions");
                        }
                        session.abort();
                    } else {
                        session.push_match(candidate).await;
                    }
                }

                session.mark_checked();
            });
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!("probe task failed: {e}");
                session.mark_checked();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeResult;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;

    struct PanicOn(EndpointCandidate);

    #[async_trait]
    impl GatewayProbe for PanicOn {
        async fn probe(&self, candidate: EndpointCandidate, _path: &str) -> ProbeResult {
            if candidate == self.0 {
                panic!("probe blew up");
            }
            ProbeResult {
                candidate,
                matched: candidate.host.octets()[3] == 5,
            }
        }
    }

    #[tokio::test]
    async fn panicking_probe_does_not_fail_the_scan() {
        let bad = EndpointCandidate::new(Ipv4Addr::new(10, 0, 0, 3), 80);
        let candidates: Vec<_> = (1..=10)
            .map(|d| EndpointCandidate::new(Ipv4Addr::new(10, 0, 0, d), 80))
            .collect();
        let scanner = ProbeScanner::new(Arc::new(PanicOn(bad)));
        let out = scanner.scan(ScanRule::StatSubnet, &candidates).await.unwrap();
        assert_eq!(out.scanned_done, 10);
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].host, Ipv4Addr::new(10, 0, 0, 5));
    }
}
