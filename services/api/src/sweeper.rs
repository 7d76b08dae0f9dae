//! services/api/src/sweeper.rs
//!
//! Periodic housekeeping over the live summaries. Summaries unfinished for too
//! long are reported for operators; nothing is deleted or failed
//! automatically. Finished summaries that sat idle are evicted from memory and
//! come back from persistence when next requested.

use std::sync::Arc;
use std::time::Duration;

use summary_stream_core::Aggregator;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often the sweep runs: a quarter of the shortest threshold, at least a second.
pub fn sweep_period(stale_after: Duration, evict_after: Option<Duration>) -> Duration {
    let shortest = evict_after.map_or(stale_after, |evict| evict.min(stale_after));
    (shortest / 4).max(Duration::from_secs(1))
}

/// Runs until `token` is cancelled.
pub async fn sweep_summaries(
    aggregator: Arc<Aggregator>,
    stale_after: Duration,
    evict_after: Option<Duration>,
    token: CancellationToken,
) {
    let max_age = match chrono::Duration::from_std(stale_after) {
        Ok(max_age) => max_age,
        Err(e) => {
            warn!(error = %e, "Stale threshold out of range; sweeping disabled.");
            return;
        }
    };
    let max_idle = match evict_after.map(chrono::Duration::from_std).transpose() {
        Ok(max_idle) => max_idle,
        Err(e) => {
            warn!(error = %e, "Eviction threshold out of range; eviction disabled.");
            None
        }
    };

    let mut ticker = tokio::time::interval(sweep_period(stale_after, evict_after));
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let stale = aggregator.stale_documents(max_age);
                if stale.is_empty() {
                    debug!("No stale summaries.");
                } else {
                    warn!(count = stale.len(), ids = ?stale, "Summaries unfinished past the stale threshold.");
                }
                if let Some(max_idle) = max_idle {
                    aggregator.evict_idle(max_idle).await;
                }
            }
        }
    }
    info!("Summary sweeper stopped.");
}
