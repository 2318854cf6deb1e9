//! CSV file sink
//!
//! Rows are written to `.wip__<prefix>_<stamp>.csv` and the file is renamed
//! to `<prefix>_<stamp>.csv` once it is rotated or the sink closes. Files
//! that never received a row are removed instead.

use super::{ExportItem, ExportSink};
use crate::config::CsvSinkConfig;
use crate::error::{MeterlinkError, Result};
use crate::snapshot::{MEASUREMENT_NAMES, Snapshot};
use chrono::Utc;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const WIP_PREFIX: &str = ".wip__";

struct OpenFile {
    writer: ::csv::Writer<File>,
    wip_path: PathBuf,
    final_path: PathBuf,
    created: Instant,
    rows: usize,
}

/// Batches snapshot rows into rotating CSV files
pub struct CsvSink {
    config: CsvSinkConfig,
    directory: PathBuf,
    pending: Vec<Vec<String>>,
    current: Option<OpenFile>,
    files_completed: usize,
}

fn header() -> Vec<String> {
    let mut columns = vec!["timestamp".to_string(), "received_at".to_string()];
    columns.extend(MEASUREMENT_NAMES.iter().map(|n| (*n).to_string()));
    columns.push("gas_timestamp".to_string());
    columns
}

fn row(snapshot: &Snapshot) -> Vec<String> {
    let mut row = vec![
        snapshot
            .timestamp
            .map(|ts| ts.utc.to_rfc3339())
            .unwrap_or_default(),
        snapshot.received_at.to_rfc3339(),
    ];
    row.extend(
        snapshot
            .measurements()
            .into_iter()
            .map(|(_, v)| v.map(|v| v.to_string()).unwrap_or_default()),
    );
    row.push(
        snapshot
            .gas
            .as_ref()
            .and_then(|g| g.timestamp)
            .map(|ts| ts.utc.to_rfc3339())
            .unwrap_or_default(),
    );
    row
}

impl CsvSink {
    pub fn new(config: CsvSinkConfig) -> Result<Self> {
        let directory = PathBuf::from(&config.directory);
        std::fs::create_dir_all(&directory).map_err(|e| {
            MeterlinkError::export(
                "csv".to_string(),
                format!("create {}: {}", directory.display(), e),
            )
        })?;
        Ok(Self {
            config,
            directory,
            pending: Vec::new(),
            current: None,
            files_completed: 0,
        })
    }

    /// Files renamed to their final name so far
    pub fn files_completed(&self) -> usize {
        self.files_completed
    }

    fn unique_paths(&self) -> (PathBuf, PathBuf) {
        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("{}_{}.csv", self.config.prefix, stamp)
            } else {
                format!("{}_{}_{}.csv", self.config.prefix, stamp, suffix)
            };
            let final_path = self.directory.join(&name);
            let wip_path = self.directory.join(format!("{}{}", WIP_PREFIX, name));
            if !final_path.exists() && !wip_path.exists() {
                return (wip_path, final_path);
            }
            suffix += 1;
        }
    }

    fn open(&mut self) -> Result<&mut OpenFile> {
        if self.current.is_none() {
            let (wip_path, final_path) = self.unique_paths();
            let mut writer = ::csv::Writer::from_path(&wip_path)?;
            writer.write_record(header())?;
            info!("Creating CSV file {}", wip_path.display());
            self.current = Some(OpenFile {
                writer,
                wip_path,
                final_path,
                created: Instant::now(),
                rows: 0,
            });
        }
        self.current
            .as_mut()
            .ok_or_else(|| MeterlinkError::export("csv", "no open file"))
    }

    fn should_rotate(&self, file: &OpenFile) -> bool {
        (self.config.max_lines > 0 && file.rows >= self.config.max_lines)
            || (self.config.max_age_seconds > 0
                && file.created.elapsed() >= Duration::from_secs(self.config.max_age_seconds))
    }

    fn write_pending(&mut self) -> Result<()> {
        let rows = std::mem::take(&mut self.pending);
        for record in rows {
            let file = self.open()?;
            file.writer.write_record(&record)?;
            file.rows += 1;
            let rotate = self
                .current
                .as_ref()
                .is_some_and(|f| self.should_rotate(f));
            if rotate {
                self.finish()?;
            }
        }
        if let Some(file) = self.current.as_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }

    /// Close the current file: rename it, or remove it when empty
    fn finish(&mut self) -> Result<()> {
        let Some(mut file) = self.current.take() else {
            return Ok(());
        };
        file.writer.flush()?;
        drop(file.writer);

        if file.rows == 0 {
            debug!("Removing empty CSV file {}", file.wip_path.display());
            std::fs::remove_file(&file.wip_path)?;
        } else {
            debug!(
                "Renaming {} to {}",
                file.wip_path.display(),
                file.final_path.display()
            );
            std::fs::rename(&file.wip_path, &file.final_path)?;
            self.files_completed += 1;
        }
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait::async_trait]
impl ExportSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn export(&mut self, item: &ExportItem) -> Result<()> {
        let ExportItem::Snapshot(snapshot) = item else {
            return Ok(());
        };
        self.pending.push(row(snapshot));
        if self.pending.len() >= self.config.write_every.max(1) {
            self.write_pending()?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.write_pending()?;
        }
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn snapshot(net: f64) -> ExportItem {
        ExportItem::Snapshot(Arc::new(Snapshot {
            meter_id: "TEST".to_string(),
            received_at: Utc::now(),
            timestamp: None,
            version: None,
            equipment_id: None,
            energy: Default::default(),
            tariff: None,
            consumption_kw: net,
            injection_kw: 0.0,
            phases: Default::default(),
            breaker: None,
            limiter_kw: None,
            fuse_threshold_a: None,
            message: None,
            gas: None,
            net_power_kw: net,
            unknown: Vec::new(),
        }))
    }

    fn config(dir: &Path, write_every: usize, max_lines: usize) -> CsvSinkConfig {
        CsvSinkConfig {
            enabled: true,
            directory: dir.to_string_lossy().into_owned(),
            prefix: "meter".to_string(),
            write_every,
            max_lines,
            max_age_seconds: 0,
        }
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn rotates_after_max_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(config(dir.path(), 1, 2)).unwrap();
        for n in 0..5 {
            sink.export(&snapshot(f64::from(n))).await.unwrap();
        }
        assert_eq!(sink.files_completed(), 2);
        assert!(files(dir.path()).iter().any(|f| f.starts_with(WIP_PREFIX)));

        sink.close().await.unwrap();
        let names = files(dir.path());
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|f| f.starts_with("meter_") && f.ends_with(".csv")));

        let mut total_rows = 0;
        for name in names {
            let mut reader = ::csv::Reader::from_path(dir.path().join(name)).unwrap();
            assert_eq!(reader.headers().unwrap().len(), header().len());
            total_rows += reader.records().count();
        }
        assert_eq!(total_rows, 5);
    }

    #[tokio::test]
    async fn batches_rows_and_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(config(dir.path(), 3, 0)).unwrap();
        sink.export(&snapshot(1.0)).await.unwrap();
        sink.export(&snapshot(2.0)).await.unwrap();
        assert!(files(dir.path()).is_empty());

        sink.close().await.unwrap();
        let names = files(dir.path());
        assert_eq!(names.len(), 1);
        let mut reader = ::csv::Reader::from_path(dir.path().join(&names[0])).unwrap();
        let net_col = reader
            .headers()
            .unwrap()
            .iter()
            .position(|h| h == "net_power")
            .unwrap();
        let nets: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[net_col].to_string())
            .collect();
        assert_eq!(nets, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn close_without_rows_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(config(dir.path(), 1, 0)).unwrap();
        sink.close().await.unwrap();
        assert!(files(dir.path()).is_empty());
    }
}
