//! Relay drivers
//!
//! Drivers turn a [`Decision`](crate::controller::Decision) into a physical
//! (or logged) state. Applying a state is expected to be immediate; failures
//! are reported to the caller, which logs them and carries on.

use crate::config::{LoadConfig, RelayConfig, RelayState};
use crate::error::{MeterlinkError, Result};
use std::path::PathBuf;
use tracing::info;

/// Drives the relay of one load
pub trait RelayDriver: Send + Sync {
    fn apply(&self, load: &str, state: RelayState) -> Result<()>;
}

/// Only records the intended state
#[derive(Debug, Default)]
pub struct LogRelay;

impl RelayDriver for LogRelay {
    fn apply(&self, load: &str, state: RelayState) -> Result<()> {
        info!("Relay {} -> {}", load, state);
        Ok(())
    }
}

/// Writes `1`/`0` to a file, e.g. a sysfs GPIO `value` file
#[derive(Debug)]
pub struct FileRelay {
    path: PathBuf,
}

impl FileRelay {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl RelayDriver for FileRelay {
    fn apply(&self, load: &str, state: RelayState) -> Result<()> {
        let value = match state {
            RelayState::On => "1",
            RelayState::Off => "0",
        };
        std::fs::write(&self.path, value).map_err(|e| {
            MeterlinkError::relay(
                load.to_string(),
                format!("write {}: {}", self.path.display(), e),
            )
        })
    }
}

/// Driver configured for `load`
pub fn build_relay(load: &LoadConfig) -> Box<dyn RelayDriver> {
    match &load.relay {
        RelayConfig::Log => Box::new(LogRelay),
        RelayConfig::File { path } => Box::new(FileRelay::new(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_relay_writes_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        let relay = FileRelay::new(&path);

        relay.apply("boiler", RelayState::On).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");
        relay.apply("boiler", RelayState::Off).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn file_relay_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let relay = FileRelay::new(dir.path().join("missing").join("value"));
        let err = relay.apply("boiler", RelayState::On).unwrap_err();
        assert!(matches!(err, MeterlinkError::Relay { .. }));
    }

    #[test]
    fn builds_configured_driver() {
        let load = LoadConfig::default();
        assert!(build_relay(&load).apply("load", RelayState::Off).is_ok());
    }
}
