//! Configuration management for meterlink
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every section has defaults so a partial file
//! (or no file at all) yields a usable configuration.

use crate::error::{MeterlinkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

mod defaults;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port parameters of the meter's P1 port
    pub serial: SerialConfig,

    /// Telegram framing and timestamp interpretation
    pub telegram: TelegramConfig,

    /// Channel sizes and overflow policy between the two processes
    pub pipeline: PipelineConfig,

    /// Controlled loads (one controller each)
    pub loads: Vec<LoadConfig>,

    /// Export sinks
    pub export: ExportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial port parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path (e.g. /dev/ttyUSB0)
    pub port: String,

    /// Baud rate (115200 for DSMR 4+/eMUCs, 9600 for older meters)
    pub baud_rate: u32,

    /// Data bits (7 or 8 depending on protocol version)
    pub data_bits: u8,

    /// Parity
    pub parity: Parity,

    /// Stop bits (1 or 2)
    pub stop_bits: u8,

    /// A read that waits longer than this returns without data
    pub read_timeout_ms: u64,
}

/// Telegram handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Upper bound on a buffered frame; larger frames are discarded
    pub max_frame_bytes: usize,

    /// IANA zone the meter's wall clock follows (e.g. Europe/Brussels)
    pub timezone: String,
}

/// What the control lane does when its consumer falls behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPolicy {
    /// Producer waits for room
    Block,
    /// Oldest buffered snapshot is evicted and counted
    DropOldest,
}

/// Pipeline sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bound of the control lane
    pub control_capacity: usize,

    /// Overflow policy of the control lane
    pub control_policy: ControlPolicy,

    /// Bound of the export lane (always back-pressure)
    pub export_capacity: usize,

    /// Bound of each sink's private queue
    pub sink_queue_capacity: usize,
}

/// Relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Off,
    On,
}

/// How a load's relay is driven
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RelayConfig {
    /// Only log the intended state
    Log,
    /// Write 1/0 to a file (sysfs GPIO value file or similar)
    File { path: String },
}

/// Per-load switching parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Unique load name
    pub name: String,

    /// Whether the controller runs for this load
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Switch on when the average surplus (injection) exceeds this (kW)
    pub surplus_kw: f64,

    /// Switch off when the average surplus drops below this (kW, may be negative)
    pub deficit_kw: f64,

    /// Rolling window length in seconds
    pub window_seconds: u64,

    /// Minimum time between two transitions in seconds
    pub min_dwell_seconds: u64,

    /// Force off when no snapshot arrives for this long
    pub staleness_timeout_seconds: u64,

    /// State assumed at startup
    pub initial_state: RelayState,

    /// Relay driver
    pub relay: RelayConfig,
}

/// Export sinks
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExportConfig {
    pub log: LogSinkConfig,
    pub csv: CsvSinkConfig,
    pub influx: InfluxSinkConfig,
}

/// Log sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub enabled: bool,
}

/// CSV sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSinkConfig {
    pub enabled: bool,

    /// Target directory
    pub directory: String,

    /// File name prefix
    pub prefix: String,

    /// Rows are buffered until this many are pending
    pub write_every: usize,

    /// Rotate after this many rows (0 = never)
    pub max_lines: usize,

    /// Rotate after this many seconds (0 = never)
    pub max_age_seconds: u64,
}

/// InfluxDB v2 sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxSinkConfig {
    pub enabled: bool,

    /// Base URL, e.g. http://localhost:8086
    pub url: String,

    pub org: String,

    pub bucket: String,

    /// API token
    pub token: String,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional override for console output
    pub console_level: Option<String>,

    /// Optional override for file output
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Number of backup files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl TelegramConfig {
    /// Resolve the configured zone name
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| MeterlinkError::validation("telegram.timezone", "Unknown timezone"))
    }
}

impl LoadConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_secs(self.min_dwell_seconds)
    }

    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_secs(self.staleness_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "meterlink.yaml",
            "/data/meterlink.yaml",
            "/etc/meterlink/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Serial port
        if self.serial.port.trim().is_empty() {
            return Err(MeterlinkError::validation(
                "serial.port",
                "Port path cannot be empty",
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(MeterlinkError::validation(
                "serial.baud_rate",
                "Must be greater than 0",
            ));
        }
        if ![7, 8].contains(&self.serial.data_bits) {
            return Err(MeterlinkError::validation(
                "serial.data_bits",
                "Must be 7 or 8",
            ));
        }
        if ![1, 2].contains(&self.serial.stop_bits) {
            return Err(MeterlinkError::validation(
                "serial.stop_bits",
                "Must be 1 or 2",
            ));
        }

        // Telegram
        if self.telegram.max_frame_bytes < 64 {
            return Err(MeterlinkError::validation(
                "telegram.max_frame_bytes",
                "Must be at least 64",
            ));
        }
        self.telegram.tz()?;

        // Pipeline
        if self.pipeline.control_capacity == 0 {
            return Err(MeterlinkError::validation(
                "pipeline.control_capacity",
                "Must be greater than 0",
            ));
        }
        if self.pipeline.export_capacity == 0 {
            return Err(MeterlinkError::validation(
                "pipeline.export_capacity",
                "Must be greater than 0",
            ));
        }
        if self.pipeline.sink_queue_capacity == 0 {
            return Err(MeterlinkError::validation(
                "pipeline.sink_queue_capacity",
                "Must be greater than 0",
            ));
        }

        // Loads
        let mut names = HashSet::new();
        for load in &self.loads {
            if load.name.trim().is_empty() {
                return Err(MeterlinkError::validation(
                    "loads.name",
                    "Load name cannot be empty",
                ));
            }
            if !names.insert(load.name.as_str()) {
                return Err(MeterlinkError::validation(
                    format!("loads.{}", load.name),
                    "Duplicate load name".to_string(),
                ));
            }
            if !load.surplus_kw.is_finite() || !load.deficit_kw.is_finite() {
                return Err(MeterlinkError::validation(
                    format!("loads.{}", load.name),
                    "Thresholds must be finite".to_string(),
                ));
            }
            if load.deficit_kw >= load.surplus_kw {
                return Err(MeterlinkError::validation(
                    format!("loads.{}.deficit_kw", load.name),
                    "Must be lower than surplus_kw".to_string(),
                ));
            }
            if load.window_seconds == 0 {
                return Err(MeterlinkError::validation(
                    format!("loads.{}.window_seconds", load.name),
                    "Must be greater than 0".to_string(),
                ));
            }
            if load.staleness_timeout_seconds == 0 {
                return Err(MeterlinkError::validation(
                    format!("loads.{}.staleness_timeout_seconds", load.name),
                    "Must be greater than 0".to_string(),
                ));
            }
            if let RelayConfig::File { path } = &load.relay
                && path.trim().is_empty()
            {
                return Err(MeterlinkError::validation(
                    format!("loads.{}.relay.path", load.name),
                    "Path cannot be empty".to_string(),
                ));
            }
        }

        // Sinks
        if self.export.csv.enabled && self.export.csv.directory.trim().is_empty() {
            return Err(MeterlinkError::validation(
                "export.csv.directory",
                "Directory cannot be empty",
            ));
        }
        if self.export.influx.enabled
            && (self.export.influx.url.trim().is_empty()
                || self.export.influx.bucket.trim().is_empty())
        {
            return Err(MeterlinkError::validation(
                "export.influx",
                "url and bucket are required",
            ));
        }

        Ok(())
    }
}
