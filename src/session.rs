use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::types::EndpointCandidate;

/// Mutable state of one scanner invocation.
///
/// Created inside each scan call and dropped when it returns; never reused across rules.
#[derive(Debug)]
pub struct ScanSession {
    total: u64,
    checked: AtomicU64,
    abort: CancellationToken,
    progress_done: CancellationToken,
    first_found: Mutex<Option<EndpointCandidate>>,
    matches: Mutex<Vec<EndpointCandidate>>,
}

impl ScanSession {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            checked: AtomicU64::new(0),
            abort: CancellationToken::new(),
            progress_done: CancellationToken::new(),
            first_found: Mutex::new(None),
            matches: Mutex::new(Vec::new()),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn checked(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }

    pub fn mark_checked(&self) {
        self.checked.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the abort flag. Idempotent.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Signal the progress reporter to exit.
    pub fn finish(&self) {
        self.progress_done.cancel();
    }

    pub fn progress_token(&self) -> &CancellationToken {
        &self.progress_done
    }

    /// Store `candidate` if the slot is empty. Returns whether it was stored.
    pub async fn record_first(&self, candidate: EndpointCandidate) -> bool {
        let mut slot = self.first_found.lock().await;
        if slot.is_some() {
            return false;
        }
        *slot = Some(candidate);
        true
    }

    pub async fn first_found(&self) -> Option<EndpointCandidate> {
        *self.first_found.lock().await
    }

    pub async fn push_match(&self, candidate: EndpointCandidate) {
        self.matches.lock().await.push(candidate);
    }

    pub async fn found_count(&self) -> usize {
        let first = usize::from(self.first_found.lock().await.is_some());
        first + self.matches.lock().await.len()
    }

    /// Collected matches, deduplicated and sorted.
    pub async fn take_matches(&self) -> Vec<EndpointCandidate> {
        let mut out = std::mem::take(&mut *self.matches.lock().await);
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(last: u8) -> EndpointCandidate {
        EndpointCandidate::new(Ipv4Addr::new(10, 0, 0, last), 80)
    }

    #[tokio::test]
    async fn first_found_is_write_once() {
        let s = ScanSession::new(10);
        assert!(s.record_first(ep(7)).await);
        assert!(!s.record_first(ep(3)).await);
        assert_eq!(s.first_found().await, Some(ep(7)));
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let s = ScanSession::new(1);
        assert!(!s.is_aborted());
        s.abort();
        s.abort();
        assert!(s.is_aborted());
        assert!(!s.progress_token().is_cancelled());
    }

    #[tokio::test]
    async fn matches_are_sorted_and_deduplicated() {
        let s = ScanSession::new(3);
        s.push_match(ep(9)).await;
        s.push_match(ep(2)).await;
        s.push_match(ep(9)).await;
        assert_eq!(s.found_count().await, 3);
        assert_eq!(s.take_matches().await, vec![ep(2), ep(9)]);
    }
}
