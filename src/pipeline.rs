//! Snapshot hand-off between acquisition and decision/export
//!
//! One producer, two ordered lanes carrying the same `Arc<Snapshot>`:
//!
//! - the control lane feeds the load controllers. It is bounded and either
//!   blocks the producer or evicts the oldest buffered snapshot when full, so
//!   the controller always works on the freshest data.
//! - the export lane feeds the sink fan-out. It is a plain bounded channel
//!   and always back-pressures.

use crate::config::{ControlPolicy, PipelineConfig};
use crate::error::{MeterlinkError, Result};
use crate::snapshot::Snapshot;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, mpsc};
use tracing::warn;

struct ControlLane {
    queue: Mutex<VecDeque<Arc<Snapshot>>>,
    capacity: usize,
    policy: ControlPolicy,
    /// Wakes the receiver when a snapshot arrives or the sender is gone
    readable: Notify,
    /// Wakes a blocked sender when room frees up or the receiver is gone
    writable: Notify,
    overflow: AtomicU64,
    sender_closed: AtomicBool,
    receiver_closed: AtomicBool,
}

impl ControlLane {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Arc<Snapshot>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false when the receiver is gone
    async fn push(&self, snapshot: Arc<Snapshot>) -> bool {
        match self.policy {
            ControlPolicy::DropOldest => {
                if self.receiver_closed.load(Ordering::Acquire) {
                    return false;
                }
                let evicted = {
                    let mut queue = self.queue();
                    let evicted = if queue.len() >= self.capacity {
                        queue.pop_front().is_some()
                    } else {
                        false
                    };
                    queue.push_back(snapshot);
                    evicted
                };
                if evicted {
                    let total = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "{}",
                        MeterlinkError::ChannelOverflow { dropped: total }
                    );
                }
                self.readable.notify_one();
                true
            }
            ControlPolicy::Block => loop {
                if self.receiver_closed.load(Ordering::Acquire) {
                    return false;
                }
                {
                    let mut queue = self.queue();
                    if queue.len() < self.capacity {
                        queue.push_back(snapshot);
                        drop(queue);
                        self.readable.notify_one();
                        return true;
                    }
                }
                self.writable.notified().await;
            },
        }
    }
}

/// Producer half, owned by the acquisition process
pub struct SnapshotSender {
    control: Arc<ControlLane>,
    export: Option<mpsc::Sender<Arc<Snapshot>>>,
}

/// Consumer half of the control lane
pub struct ControlReceiver {
    lane: Arc<ControlLane>,
}

/// Consumer half of the export lane
pub struct ExportReceiver {
    rx: mpsc::Receiver<Arc<Snapshot>>,
}

/// Build both lanes from the pipeline configuration
pub fn pipeline(config: &PipelineConfig) -> (SnapshotSender, ControlReceiver, ExportReceiver) {
    let control = Arc::new(ControlLane {
        queue: Mutex::new(VecDeque::with_capacity(config.control_capacity)),
        capacity: config.control_capacity.max(1),
        policy: config.control_policy,
        readable: Notify::new(),
        writable: Notify::new(),
        overflow: AtomicU64::new(0),
        sender_closed: AtomicBool::new(false),
        receiver_closed: AtomicBool::new(false),
    });
    let (tx, rx) = mpsc::channel(config.export_capacity.max(1));

    (
        SnapshotSender {
            control: control.clone(),
            export: Some(tx),
        },
        ControlReceiver { lane: control },
        ExportReceiver { rx },
    )
}

impl SnapshotSender {
    /// Publish a snapshot to both lanes, in order
    ///
    /// Lanes whose consumer has gone away are skipped. Fails only when no
    /// consumer is left.
    pub async fn send(&mut self, snapshot: Snapshot) -> Result<()> {
        let shared = Arc::new(snapshot);
        let mut delivered = self.control.push(shared.clone()).await;

        if let Some(tx) = &self.export {
            if tx.send(shared).await.is_ok() {
                delivered = true;
            } else {
                self.export = None;
            }
        }

        if delivered {
            Ok(())
        } else {
            Err(MeterlinkError::channel_closed("no consumer left"))
        }
    }

    /// Snapshots evicted from the control lane so far
    pub fn overflow_count(&self) -> u64 {
        self.control.overflow.load(Ordering::Relaxed)
    }
}

impl Drop for SnapshotSender {
    fn drop(&mut self) {
        self.control.sender_closed.store(true, Ordering::Release);
        self.control.readable.notify_one();
    }
}

impl ControlReceiver {
    /// Next snapshot, or `None` once the sender is gone and the lane drained
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            {
                let mut queue = self.lane.queue();
                if let Some(snapshot) = queue.pop_front() {
                    drop(queue);
                    self.lane.writable.notify_one();
                    return Some(snapshot);
                }
                if self.lane.sender_closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.lane.readable.notified().await;
        }
    }

    pub fn overflow_count(&self) -> u64 {
        self.lane.overflow.load(Ordering::Relaxed)
    }

    /// Snapshots currently buffered
    pub fn len(&self) -> usize {
        self.lane.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ControlReceiver {
    fn drop(&mut self) {
        self.lane.receiver_closed.store(true, Ordering::Release);
        self.lane.writable.notify_one();
    }
}

impl ExportReceiver {
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.recv().await
    }
}
