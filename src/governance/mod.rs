pub mod admission;
pub mod commit;
pub mod entities;
pub mod events;
pub mod memory;
pub mod reconciler;
pub mod rest;
pub mod store;
pub mod store_memory;
pub mod store_postgres;
pub mod ticker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use admission::{admit, AdmissionGrant};
pub use commit::commit_usage;
pub use events::SyncEvent;
pub use memory::MemoryPlane;
pub use store::GovernanceStore;
pub use store_memory::InMemoryStore;
pub use store_postgres::PostgresStore;

/// Bundles the durable store, the memory plane it feeds, and the two
/// background tasks (reconciler, reset ticker) that keep them moving. This
/// is what `main.rs` constructs once at startup and threads through as
/// `web::Data`.
pub struct GovernanceEngine {
    pub store: Arc<dyn GovernanceStore>,
    pub memory: Arc<MemoryPlane>,
    reconciler_handle: (JoinHandle<()>, CancellationToken),
    ticker_handle: (JoinHandle<()>, CancellationToken),
}

impl GovernanceEngine {
    /// `build_store` receives the event sender and must construct the
    /// concrete store (memory-backed or Postgres-backed) around it, since
    /// the sender has to be created before the store can be. `queue_capacity`
    /// bounds the sync event channel; a store that falls behind the
    /// reconciler logs and drops rather than blocking the write path.
    pub fn start<F>(build_store: F, reset_tick_interval: Duration, queue_capacity: usize) -> Self
    where
        F: FnOnce(mpsc::Sender<SyncEvent>) -> Arc<dyn GovernanceStore>,
    {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let store = build_store(tx);
        let memory = Arc::new(MemoryPlane::new());

        let reconciler_handle = reconciler::spawn(memory.clone(), rx);
        let ticker_handle = ticker::spawn(memory.clone(), reset_tick_interval);

        Self {
            store,
            memory,
            reconciler_handle,
            ticker_handle,
        }
    }

    pub async fn shutdown(self) {
        self.reconciler_handle.1.cancel();
        self.ticker_handle.1.cancel();
        let _ = self.reconciler_handle.0.await;
        let _ = self.ticker_handle.0.await;
    }
}
