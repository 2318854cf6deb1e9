//! Acquisition process
//!
//! Owns the byte source and the telegram stages. Reads until shutdown, the
//! end of the stream, or a fatal source error; everything else (framing,
//! checksum, decode and model errors) is counted, logged and skipped.

use crate::config::TelegramConfig;
use crate::error::Result;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::pipeline::SnapshotSender;
use crate::snapshot::Snapshot;
use crate::source::{ByteSource, ReadOutcome};
use crate::telegram::{FieldDecoder, FrameAssembler, validate};
use chrono::Utc;
use std::fmt;
use tokio::sync::watch;

/// Drift beyond this is logged as a warning
const MAX_CLOCK_DRIFT_SECONDS: i64 = 60;

const READ_BUFFER_BYTES: usize = 1024;

/// Counters of the acquisition process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub bytes_read: u64,
    pub idle_reads: u64,
    pub frames: u64,
    pub framing_errors: u64,
    pub checksum_errors: u64,
    pub line_errors: u64,
    pub model_errors: u64,
    pub snapshots: u64,
    pub control_overflow: u64,
}

impl fmt::Display for AcquisitionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bytes={} frames={} snapshots={} framing_errors={} checksum_errors={} \
             line_errors={} model_errors={} idle_reads={} control_overflow={}",
            self.bytes_read,
            self.frames,
            self.snapshots,
            self.framing_errors,
            self.checksum_errors,
            self.line_errors,
            self.model_errors,
            self.idle_reads,
            self.control_overflow
        )
    }
}

/// Source -> assembler -> CRC -> decoder -> model -> pipeline
pub struct Acquisition<S: ByteSource> {
    source: S,
    assembler: FrameAssembler,
    decoder: FieldDecoder,
    sender: SnapshotSender,
    stats: AcquisitionStats,
    meter_id: Option<String>,
    logger: StructuredLogger,
}

impl<S: ByteSource> Acquisition<S> {
    pub fn new(source: S, config: &TelegramConfig, sender: SnapshotSender) -> Result<Self> {
        let logger = get_logger_with_context(
            LogContext::new("acquisition").with_field("source", source.describe()),
        );
        Ok(Self {
            source,
            assembler: FrameAssembler::new(config.max_frame_bytes),
            decoder: FieldDecoder::new(config.tz()?),
            sender,
            stats: AcquisitionStats::default(),
            meter_id: None,
            logger,
        })
    }

    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    /// Run until shutdown or end of stream
    ///
    /// Returns the counters on a clean stop and the source error when the
    /// source failed. The sender is dropped on return, which closes both
    /// pipeline lanes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<AcquisitionStats> {
        self.logger.info("Acquisition started");
        let mut buf = vec![0u8; READ_BUFFER_BYTES];

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.source.read_bytes(&mut buf) => outcome,
            };

            match outcome {
                Ok(ReadOutcome::Data(n)) => {
                    self.stats.bytes_read += n as u64;
                    if !self.process(&buf[..n], &mut shutdown).await {
                        break;
                    }
                }
                Ok(ReadOutcome::Idle) => {
                    self.stats.idle_reads += 1;
                    self.logger.trace("No data from source");
                }
                Ok(ReadOutcome::Closed) => {
                    self.logger.info("Source reached end of stream");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    self.stats.control_overflow = self.sender.overflow_count();
                    self.logger
                        .error(&format!("{} (stats: {})", e, self.stats));
                    return Err(e);
                }
                Err(e) => self.logger.warn(&e.to_string()),
            }
        }

        self.stats.control_overflow = self.sender.overflow_count();
        self.logger
            .info(&format!("Acquisition stopped: {}", self.stats));
        Ok(self.stats)
    }

    /// Push bytes through the stages; false once nobody is listening anymore
    async fn process(&mut self, bytes: &[u8], shutdown: &mut watch::Receiver<bool>) -> bool {
        for event in self.assembler.push(bytes) {
            let frame = match event {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.framing_errors += 1;
                    self.logger.warn(&e.to_string());
                    continue;
                }
            };
            self.stats.frames += 1;

            let validated = match validate(frame) {
                Ok(v) => v,
                Err(e) => {
                    self.stats.checksum_errors += 1;
                    self.logger.warn(&e.to_string());
                    continue;
                }
            };

            let decoded = self.decoder.decode_frame(&validated);
            for e in &decoded.line_errors {
                self.stats.line_errors += 1;
                self.logger.warn(&e.to_string());
            }

            let snapshot = match Snapshot::build(decoded, Utc::now()) {
                Ok(s) => s,
                Err(e) => {
                    self.stats.model_errors += 1;
                    self.logger.warn(&e.to_string());
                    continue;
                }
            };
            self.observe(&snapshot);

            tokio::select! {
                sent = self.sender.send(snapshot) => {
                    if let Err(e) = sent {
                        self.logger.warn(&e.to_string());
                        return false;
                    }
                    self.stats.snapshots += 1;
                }
                _ = shutdown.changed() => return false,
            }
        }
        true
    }

    fn observe(&mut self, snapshot: &Snapshot) {
        if self.meter_id.as_deref() != Some(snapshot.meter_id.as_str()) {
            self.logger = get_logger_with_context(
                self.logger
                    .context()
                    .clone()
                    .with_meter_id(&snapshot.meter_id),
            );
            self.logger.info("Receiving telegrams from new meter");
            self.meter_id = Some(snapshot.meter_id.clone());
        }

        if let Some(drift) = snapshot.clock_drift_seconds() {
            let message = format!("Meter clock drift: {}s", drift);
            if drift.abs() > MAX_CLOCK_DRIFT_SECONDS {
                self.logger.warn(&message);
            } else {
                self.logger.debug(&message);
            }
        }
    }
}
