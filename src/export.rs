//! Export fan-out
//!
//! Every sink gets a private bounded queue and a worker task. Dispatching
//! never waits: when a sink's queue is full the item is dropped for that sink
//! and counted, so a slow database cannot hold up relay decisions. When the
//! last dispatcher handle goes away the workers drain their queues, close
//! their sinks and report their counters. On shutdown a worker finishes the
//! item in flight and discards the rest of its queue as dropped.

use crate::config::ExportConfig;
use crate::controller::Decision;
use crate::error::Result;
use crate::pipeline::ExportReceiver;
use crate::snapshot::Snapshot;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod csv;
#[cfg(feature = "influx")]
pub mod influx;
pub mod log;

pub use self::csv::CsvSink;
#[cfg(feature = "influx")]
pub use self::influx::InfluxSink;
pub use self::log::LogSink;

/// What travels to the sinks
#[derive(Debug, Clone)]
pub enum ExportItem {
    Snapshot(Arc<Snapshot>),
    Decision(Arc<Decision>),
}

/// Destination for snapshots and decisions
#[async_trait::async_trait]
pub trait ExportSink: Send {
    fn name(&self) -> &str;

    /// Deliver one item; errors are counted by the worker, never retried
    async fn export(&mut self, item: &ExportItem) -> Result<()>;

    /// Flush and release resources
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SinkCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Counters of one sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub name: String,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl fmt::Display for SinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: delivered={} failed={} dropped={}",
            self.name, self.delivered, self.failed, self.dropped
        )
    }
}

/// Counters of all sinks, reported at shutdown
#[derive(Debug, Clone, Default)]
pub struct ExportStats {
    pub sinks: Vec<SinkStats>,
}

struct SinkLane {
    name: String,
    tx: mpsc::Sender<ExportItem>,
    counters: Arc<SinkCounters>,
}

/// Cheap handle that fans items out to every sink queue
#[derive(Clone)]
pub struct ExportDispatcher {
    lanes: Arc<Vec<SinkLane>>,
}

/// Worker tasks behind a dispatcher
pub struct ExportWorkers {
    handles: Vec<JoinHandle<()>>,
    counters: Vec<(String, Arc<SinkCounters>)>,
}

impl ExportDispatcher {
    /// Spawn one worker per sink, each with a queue of `capacity` items
    pub fn spawn(
        sinks: Vec<Box<dyn ExportSink>>,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, ExportWorkers) {
        let mut lanes = Vec::with_capacity(sinks.len());
        let mut handles = Vec::with_capacity(sinks.len());
        let mut counters = Vec::with_capacity(sinks.len());

        for sink in sinks {
            let name = sink.name().to_string();
            let (tx, rx) = mpsc::channel(capacity.max(1));
            let sink_counters = Arc::new(SinkCounters::default());
            handles.push(tokio::spawn(run_sink(
                sink,
                rx,
                sink_counters.clone(),
                shutdown.clone(),
            )));
            counters.push((name.clone(), sink_counters.clone()));
            lanes.push(SinkLane {
                name,
                tx,
                counters: sink_counters,
            });
        }

        (
            Self {
                lanes: Arc::new(lanes),
            },
            ExportWorkers { handles, counters },
        )
    }

    /// Queue `item` on every sink without waiting
    pub fn dispatch(&self, item: ExportItem) {
        for lane in self.lanes.iter() {
            match lane.tx.try_send(item.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = lane.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "Export queue of {} is full, item dropped ({} so far)",
                        lane.name, dropped
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    lane.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Export sink {} has stopped, item dropped", lane.name);
                }
            }
        }
    }

    pub fn sink_count(&self) -> usize {
        self.lanes.len()
    }
}

impl ExportWorkers {
    /// Wait for every worker to drain and close its sink
    ///
    /// Completes once all dispatcher handles have been dropped, or shortly
    /// after shutdown flips.
    pub async fn join(self) -> ExportStats {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Export worker ended abnormally: {}", e);
            }
        }
        ExportStats {
            sinks: self
                .counters
                .iter()
                .map(|(name, c)| SinkStats {
                    name: name.clone(),
                    delivered: c.delivered.load(Ordering::Relaxed),
                    failed: c.failed.load(Ordering::Relaxed),
                    dropped: c.dropped.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

async fn run_sink(
    mut sink: Box<dyn ExportSink>,
    mut rx: mpsc::Receiver<ExportItem>,
    counters: Arc<SinkCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut watching = true;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let item = tokio::select! {
            changed = shutdown.changed(), if watching => {
                // Sender gone: nobody can ask for shutdown any more
                if changed.is_err() {
                    watching = false;
                }
                continue;
            }
            item = rx.recv() => item,
        };
        let Some(item) = item else {
            break;
        };
        match sink.export(&item).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("{}", e);
            }
        }
    }

    rx.close();
    let mut discarded = 0u64;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        counters.dropped.fetch_add(discarded, Ordering::Relaxed);
        warn!(
            "Export sink {} stopped with {} queued items discarded",
            sink.name(),
            discarded
        );
    }

    if let Err(e) = sink.close().await {
        warn!("Closing export sink {} failed: {}", sink.name(), e);
    }
    debug!("Export sink {} closed", sink.name());
}

/// Forward the export lane to the sinks until the producer goes away
pub async fn run_export_lane(mut lane: ExportReceiver, dispatcher: ExportDispatcher) {
    while let Some(snapshot) = lane.recv().await {
        dispatcher.dispatch(ExportItem::Snapshot(snapshot));
    }
    debug!("Export lane closed");
}

/// Sinks enabled in the configuration
pub fn build_sinks(config: &ExportConfig) -> Result<Vec<Box<dyn ExportSink>>> {
    let mut sinks: Vec<Box<dyn ExportSink>> = Vec::new();
    if config.log.enabled {
        sinks.push(Box::new(LogSink::new()));
    }
    if config.csv.enabled {
        sinks.push(Box::new(CsvSink::new(config.csv.clone())?));
    }
    if config.influx.enabled {
        #[cfg(feature = "influx")]
        sinks.push(Box::new(InfluxSink::new(config.influx.clone())?));
        #[cfg(not(feature = "influx"))]
        warn!("InfluxDB export configured but meterlink was built without the influx feature");
    }
    info!(
        "Export sinks: [{}]",
        sinks
            .iter()
            .map(|s| s.name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(sinks)
}
