use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::events::SyncEvent;
use super::memory::MemoryPlane;

/// Single consumer of the store's `SyncEvent` stream. It is the only writer
/// to the memory plane; every other component only reads from it.
pub fn spawn(
    memory: Arc<MemoryPlane>,
    mut events: Receiver<SyncEvent>,
) -> (JoinHandle<()>, CancellationToken) {
    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = task_token.cancelled() => {
                    info!("governance reconciler stopping");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            debug!(?event, "applying sync event to memory plane");
                            memory.apply(event);
                        }
                        None => {
                            info!("governance reconciler channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    });

    (handle, cancellation_token)
}
