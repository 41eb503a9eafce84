use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::memory::MemoryPlane;

/// Periodic sweep that applies lazy resets to every budget and rate limit
/// even when nothing is actively hitting them, so a key that goes quiet for
/// a full window comes back with a clean counter on its first request
/// rather than paying the reset cost inline.
pub fn spawn(memory: Arc<MemoryPlane>, interval: Duration) -> (JoinHandle<()>, CancellationToken) {
    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = task_token.cancelled() => {
                    info!("governance reset ticker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let reset_count = sweep_once(&memory);
                    if reset_count > 0 {
                        debug!(count = reset_count, "applied lazy resets");
                    }
                }
            }
        }
    });

    (handle, cancellation_token)
}

fn sweep_once(memory: &Arc<MemoryPlane>) -> usize {
    let now = Utc::now();
    let mut resets = 0;

    for entry in memory.budgets_iter() {
        let handle = entry.value().clone();
        let mut guard = match handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.current_usage;
        guard.apply_lazy_reset(now);
        if guard.current_usage != before {
            resets += 1;
        }
    }

    for entry in memory.rate_limits_iter() {
        let handle = entry.value().clone();
        let mut guard = match handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut changed = false;
        if let Some(token) = guard.token.as_mut() {
            let before = token.usage;
            token.apply_lazy_reset(now);
            changed |= token.usage != before;
        }
        if let Some(request) = guard.request.as_mut() {
            let before = request.usage;
            request.apply_lazy_reset(now);
            changed |= request.usage != before;
        }
        if changed {
            resets += 1;
        }
    }

    resets
}
