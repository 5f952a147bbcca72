use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

use crate::session::ScanSession;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn a background task that logs scan progress every `period`.
///
/// The task exits on the tick after the session aborts, signals `finish`, or has checked every
/// candidate.
pub fn spawn_reporter(session: Arc<ScanSession>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = session.progress_token().cancelled() => break,
                _ = session.abort_token().cancelled() => break,
                _ = ticker.tick() => {
                    if session.checked() >= session.total() {
                        break;
                    }
                    info!(
                        "scanned {}/{}, gateways found: {}",
                        session.checked(),
                        session.total(),
                        session.found_count().await
                    );
                }
            }
        }
    })
}
