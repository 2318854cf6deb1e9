//! Byte sources feeding the frame assembler

use crate::config::{Parity, SerialConfig};
use crate::error::{MeterlinkError, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Result of one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written to the buffer (may be zero)
    Data(usize),
    /// Nothing arrived in time; not an error
    Idle,
    /// End of stream
    Closed,
}

/// Anything that yields telegram bytes
#[async_trait::async_trait]
pub trait ByteSource: Send {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

#[async_trait::async_trait]
impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        (**self).read_bytes(buf).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// The meter's P1 port
pub struct SerialSource {
    port: SerialStream,
    path: String,
    read_timeout: Duration,
}

impl SerialSource {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening serial port {} ({} baud, {}{}{})",
            config.port,
            config.baud_rate,
            config.data_bits,
            parity_letter(config.parity),
            config.stop_bits
        );
        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(data_bits(config.data_bits))
            .parity(parity(config.parity))
            .stop_bits(stop_bits(config.stop_bits))
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(config.read_timeout())
            .open_native_async()
            .map_err(|e| {
                MeterlinkError::source_failure(format!(
                    "Failed to open serial port {}: {}",
                    config.port, e
                ))
            })?;
        info!("Opened serial port {}", config.port);

        Ok(Self {
            port,
            path: config.port.clone(),
            read_timeout: config.read_timeout(),
        })
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

fn parity_letter(parity: Parity) -> char {
    match parity {
        Parity::None => 'N',
        Parity::Even => 'E',
        Parity::Odd => 'O',
    }
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

#[async_trait::async_trait]
impl ByteSource for SerialSource {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        match tokio::time::timeout(self.read_timeout, self.port.read(buf)).await {
            Err(_) => Ok(ReadOutcome::Idle),
            Ok(Ok(0)) => Err(MeterlinkError::source_failure(format!(
                "serial port {} closed",
                self.path
            ))),
            Ok(Ok(n)) => Ok(ReadOutcome::Data(n)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(ReadOutcome::Idle),
            Ok(Err(e)) => Err(MeterlinkError::source_failure(format!(
                "serial port {}: {}",
                self.path, e
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.path)
    }
}

/// A recorded byte stream played back from a file
pub struct ReplaySource {
    file: tokio::fs::File,
    path: PathBuf,
    chunk: usize,
    interval: Option<Duration>,
    started: bool,
}

impl ReplaySource {
    /// `chunk` bounds each read; `interval` paces consecutive reads
    pub async fn open<P: AsRef<Path>>(
        path: P,
        chunk: usize,
        interval: Option<Duration>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            MeterlinkError::source_failure(format!("open {}: {}", path.display(), e))
        })?;
        Ok(Self {
            file,
            path,
            chunk: chunk.max(1),
            interval,
            started: false,
        })
    }
}

#[async_trait::async_trait]
impl ByteSource for ReplaySource {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if let Some(interval) = self.interval.filter(|_| self.started) {
            tokio::time::sleep(interval).await;
        }
        self.started = true;

        let len = buf.len().min(self.chunk);
        let n = self.file.read(&mut buf[..len]).await.map_err(|e| {
            MeterlinkError::source_failure(format!("read {}: {}", self.path.display(), e))
        })?;
        if n == 0 && len > 0 {
            return Ok(ReadOutcome::Closed);
        }
        Ok(ReadOutcome::Data(n))
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.path.display())
    }
}

/// One scripted read of a [`MemorySource`]
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Bytes(Vec<u8>),
    Idle,
    /// Silence for a while, then an idle read
    Wait(Duration),
    Fail(String),
}

/// Scripted source for tests and tooling; closes when the script runs out
#[derive(Debug, Default)]
pub struct MemorySource {
    steps: VecDeque<ScriptStep>,
}

impl MemorySource {
    pub fn new<I: IntoIterator<Item = ScriptStep>>(steps: I) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Split `bytes` into reads of at most `chunk` bytes
    pub fn chunked(bytes: &[u8], chunk: usize) -> Self {
        Self::new(
            bytes
                .chunks(chunk.max(1))
                .map(|c| ScriptStep::Bytes(c.to_vec())),
        )
    }

    pub fn push(&mut self, step: ScriptStep) {
        self.steps.push_back(step);
    }
}

#[async_trait::async_trait]
impl ByteSource for MemorySource {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        match self.steps.pop_front() {
            None => Ok(ReadOutcome::Closed),
            Some(ScriptStep::Idle) => Ok(ReadOutcome::Idle),
            Some(ScriptStep::Wait(pause)) => {
                tokio::time::sleep(pause).await;
                Ok(ReadOutcome::Idle)
            }
            Some(ScriptStep::Fail(message)) => Err(MeterlinkError::source_failure(message)),
            Some(ScriptStep::Bytes(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.steps.push_front(ScriptStep::Bytes(bytes.split_off(n)));
                }
                Ok(ReadOutcome::Data(n))
            }
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_follows_script() {
        let mut source = MemorySource::new([
            ScriptStep::Bytes(b"abcdef".to_vec()),
            ScriptStep::Idle,
            ScriptStep::Bytes(Vec::new()),
            ScriptStep::Fail("unplugged".to_string()),
        ]);
        let mut buf = [0u8; 4];
        assert_eq!(source.read_bytes(&mut buf).await.unwrap(), ReadOutcome::Data(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(source.read_bytes(&mut buf).await.unwrap(), ReadOutcome::Data(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(source.read_bytes(&mut buf).await.unwrap(), ReadOutcome::Idle);
        assert_eq!(source.read_bytes(&mut buf).await.unwrap(), ReadOutcome::Data(0));
        assert!(source.read_bytes(&mut buf).await.unwrap_err().is_fatal());
        assert_eq!(source.read_bytes(&mut buf).await.unwrap(), ReadOutcome::Closed);
    }

    #[tokio::test]
    async fn replay_source_reads_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut source = ReplaySource::open(&path, 4, None).await.unwrap();
        let mut buf = [0u8; 64];
        let mut collected = Vec::new();
        loop {
            match source.read_bytes(&mut buf).await.unwrap() {
                ReadOutcome::Data(n) => {
                    assert!(n <= 4);
                    collected.extend_from_slice(&buf[..n]);
                }
                ReadOutcome::Idle => {}
                ReadOutcome::Closed => break,
            }
        }
        assert_eq!(collected, b"0123456789");
        assert!(source.describe().starts_with("replay:"));
    }

    #[tokio::test]
    async fn replay_source_missing_file_is_fatal() {
        let err = ReplaySource::open("/nonexistent/capture.bin", 64, None)
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
