//! Deferred artifact deletion.
//!
//! A single worker task owns a `DelayQueue` of pending expiries. `arm` only
//! sends a message, so the request path never waits on the timer. The worker
//! is aborted when the last scheduler handle is dropped; expiries that have
//! not fired by then are lost along with the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::DelayQueue;

use crate::artifact::{ArtifactId, ArtifactStore};
use crate::utils::task::AbortOnDrop;
use crate::{PortraitError, Result};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(120);

#[derive(Debug)]
struct Arm {
    id: ArtifactId,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    expired: AtomicU64,
}

#[derive(Clone, Debug)]
pub struct ExpiryScheduler {
    tx: mpsc::UnboundedSender<Arm>,
    counters: Arc<Counters>,
    _worker: Arc<AbortOnDrop>,
}

impl ExpiryScheduler {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(store: Arc<ArtifactStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(store, rx, counters.clone()));
        Self {
            tx,
            counters,
            _worker: Arc::new(AbortOnDrop::new(worker.abort_handle())),
        }
    }

    /// Schedules exactly one deletion of `id` once `delay` has elapsed.
    pub fn arm(&self, id: ArtifactId, delay: Duration) -> Result<()> {
        let deadline = Instant::now() + delay;
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Arm { id, deadline }).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(PortraitError::Internal(
                "expiry worker is not running".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    pub fn expired_total(&self) -> u64 {
        self.counters.expired.load(Ordering::SeqCst)
    }
}

async fn run_worker(
    store: Arc<ArtifactStore>,
    mut rx: mpsc::UnboundedReceiver<Arm>,
    counters: Arc<Counters>,
) {
    let mut queue = DelayQueue::<ArtifactId>::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            arm = rx.recv(), if accepting => match arm {
                Some(Arm { id, deadline }) => {
                    tracing::debug!(artifact_id = %id, "expiry armed");
                    queue.insert_at(id, deadline);
                }
                None => accepting = false,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let id = expired.into_inner();
                store.delete(&id).await;
                counters.pending.fetch_sub(1, Ordering::SeqCst);
                counters.expired.fetch_add(1, Ordering::SeqCst);
                tracing::info!(artifact_id = %id, "artifact expired");
            }
            else => break,
        }
    }
}
