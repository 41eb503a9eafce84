use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Accumulator;

/// Background task that evicts unreferenced entries older than the
/// configured TTL. Lazy `Cleanup` (ref_count reaching zero) is the primary
/// removal path; this sweeper is the backstop for subscribers that never
/// call `Cleanup` (crashed plugin, dropped connection).
pub fn spawn(accumulator: Arc<Accumulator>, sweep_interval: Duration, ttl: Duration) -> (JoinHandle<()>, CancellationToken) {
    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = task_token.cancelled() => {
                    info!("accumulator TTL sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let swept = accumulator.sweep_expired(ttl);
                    if swept > 0 {
                        debug!(count = swept, "swept expired accumulator entries");
                    }
                }
            }
        }
    });

    (handle, cancellation_token)
}
