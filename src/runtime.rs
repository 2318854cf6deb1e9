//! Process wiring
//!
//! The acquisition process runs on its own OS thread with a single-threaded
//! Tokio runtime, so a busy decision/export side can never starve serial
//! reads. Everything else runs on the caller's runtime. The pipeline is the
//! only link between the two; shutdown is broadcast through a `watch`
//! channel.

use crate::acquisition::{Acquisition, AcquisitionStats};
use crate::config::{Config, SerialConfig, TelegramConfig};
use crate::decision::{DecisionLoop, DecisionStats};
use crate::error::{MeterlinkError, Result};
use crate::export::{ExportDispatcher, ExportStats, build_sinks, run_export_lane};
use crate::pipeline::{SnapshotSender, pipeline};
use crate::source::{ByteSource, MemorySource, ReplaySource, SerialSource};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

/// Where the acquisition process gets its bytes
#[derive(Debug)]
pub enum SourceSpec {
    Serial(SerialConfig),
    Replay {
        path: PathBuf,
        chunk: usize,
        interval: Option<Duration>,
    },
    Memory(MemorySource),
}

impl SourceSpec {
    /// Must run inside the runtime that will drive the source
    async fn open(self) -> Result<Box<dyn ByteSource>> {
        Ok(match self {
            SourceSpec::Serial(config) => Box::new(SerialSource::open(&config)?),
            SourceSpec::Replay {
                path,
                chunk,
                interval,
            } => Box::new(ReplaySource::open(path, chunk, interval).await?),
            SourceSpec::Memory(source) => Box::new(source),
        })
    }
}

/// Running acquisition thread
pub struct AcquisitionHandle {
    thread: std::thread::JoinHandle<()>,
    done: oneshot::Receiver<Result<AcquisitionStats>>,
}

impl AcquisitionHandle {
    /// Resolves when the thread has finished
    pub async fn wait(self) -> Result<AcquisitionStats> {
        let result = self.done.await.unwrap_or_else(|_| {
            Err(MeterlinkError::source_failure(
                "acquisition thread ended without a result",
            ))
        });
        let thread = self.thread;
        let joined = tokio::task::spawn_blocking(move || thread.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            warn!("Acquisition thread panicked");
        }
        result
    }
}

/// Start the acquisition process on a dedicated thread
pub fn spawn_acquisition(
    source: SourceSpec,
    telegram: TelegramConfig,
    sender: SnapshotSender,
    shutdown: watch::Receiver<bool>,
) -> Result<AcquisitionHandle> {
    let (done_tx, done_rx) = oneshot::channel();
    let thread = std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(MeterlinkError::from)
                .and_then(|rt| {
                    rt.block_on(async move {
                        let source = source.open().await?;
                        Acquisition::new(source, &telegram, sender)?
                            .run(shutdown)
                            .await
                    })
                });
            let _ = done_tx.send(result);
        })?;

    Ok(AcquisitionHandle {
        thread,
        done: done_rx,
    })
}

/// Counters of a complete run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub acquisition: AcquisitionStats,
    pub decision: DecisionStats,
    pub export: ExportStats,
}

/// Run both processes until `shutdown` flips or the source ends
///
/// A fatal source error is returned after the decision/export side has been
/// stopped and drained. Shutdown does not wait for sink backlogs.
pub async fn run(
    config: &Config,
    source: SourceSpec,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let (sender, control, export_lane) = pipeline(&config.pipeline);

    let sinks = build_sinks(&config.export)?;
    let (dispatcher, workers) = ExportDispatcher::spawn(
        sinks,
        config.pipeline.sink_queue_capacity,
        shutdown.clone(),
    );

    let decision_loop = DecisionLoop::new(&config.loads, Some(dispatcher.clone()));
    let decision_task = tokio::spawn(decision_loop.run(control, shutdown.clone()));
    let export_task = tokio::spawn(run_export_lane(export_lane, dispatcher));

    let acquisition = spawn_acquisition(source, config.telegram.clone(), sender, shutdown)?;
    info!("meterlink running");

    // The sender is gone once acquisition returns, so the decision loop and
    // the export lane drain what is buffered and stop on their own. After a
    // shutdown signal the sink workers only finish the item in flight.
    let acquired = acquisition.wait().await;

    let decision = decision_task.await.map_err(|e| {
        MeterlinkError::generic(format!("decision task failed: {}", e))
    })?;
    if let Err(e) = export_task.await {
        warn!("Export lane task failed: {}", e);
    }
    let export = workers.join().await;

    for sink in &export.sinks {
        info!("Export {}", sink);
    }

    let acquisition = acquired?;
    info!("Acquisition: {}", acquisition);
    info!("Decisions: {}", decision);
    Ok(RunSummary {
        acquisition,
        decision,
        export,
    })
}
