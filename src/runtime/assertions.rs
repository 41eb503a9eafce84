use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

/// Process-wide count of recovered invariant violations (poisoned mutexes,
/// pool/map races) that were logged and survived rather than allowed to
/// crash the process.
static ASSERTION_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Logs `context` at error level and increments the process-wide counter.
/// Call this instead of a bare `warn!` wherever a lock or map invariant was
/// violated but recovery is possible (e.g. a poisoned mutex).
pub fn record_assertion_failure(context: &str) {
    error!(context, "recovered invariant violation");
    ASSERTION_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn assertion_failure_count() -> u64 {
    ASSERTION_FAILURES.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments_on_each_call() {
        let before = assertion_failure_count();
        record_assertion_failure("test");
        assert_eq!(assertion_failure_count(), before + 1);
    }
}
