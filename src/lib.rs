//! # meterlink - P1 smart meter reader and surplus load switcher
//!
//! Reads DSMR/P1 telegrams from a smart meter's serial port, turns them into
//! typed snapshots and switches loads on and off based on the averaged power
//! surplus. Snapshots and relay decisions are exported to logs, CSV files and
//! InfluxDB.
//!
//! ## Architecture
//!
//! Two cooperating processes connected by a two-lane pipeline:
//!
//! - acquisition (dedicated thread): `source` -> `telegram` (framing, CRC,
//!   decoding) -> `snapshot` -> `pipeline`
//! - decision/export (main runtime): `pipeline` -> `controller` -> `relay`,
//!   and `pipeline` -> `export`
//!
//! Supporting modules:
//!
//! - `config`: YAML configuration and validation
//! - `logging`: tracing setup and structured loggers
//! - `error`: crate error type
//! - `runtime`: wiring of the processes and shutdown

pub mod acquisition;
pub mod config;
pub mod controller;
pub mod decision;
pub mod error;
pub mod export;
pub mod logging;
pub mod pipeline;
pub mod relay;
pub mod runtime;
pub mod snapshot;
pub mod source;
pub mod telegram;

// Re-export commonly used types
pub use config::Config;
pub use error::{MeterlinkError, Result};
pub use snapshot::Snapshot;
