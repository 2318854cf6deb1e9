//! Error types and handling for meterlink
//!
//! Every failure the pipeline can run into is a variant of [`MeterlinkError`].
//! Per-frame and per-field variants are recovered where they occur; only
//! [`MeterlinkError::Source`] ends the acquisition process.

use thiserror::Error;

/// Result type alias for meterlink operations
pub type Result<T> = std::result::Result<T, MeterlinkError>;

/// Main error type for meterlink
#[derive(Debug, Error)]
pub enum MeterlinkError {
    /// Stream could not be cut into frames (resync, non-fatal)
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// Frame failed the CRC check (frame dropped, non-fatal)
    #[error("Checksum error: expected {expected:04X}, computed {computed:04X}")]
    Checksum { expected: u16, computed: u16 },

    /// Checksum trailer is not four hex digits (frame dropped, non-fatal)
    #[error("Checksum error: unreadable trailer '{trailer}'")]
    MalformedChecksum { trailer: String },

    /// A telegram line did not match the field grammar
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// A telegram decoded but lacked the fields needed for a snapshot
    #[error("Model error: {field} - {message}")]
    Model { field: String, message: String },

    /// No valid snapshot within the staleness timeout
    #[error("Staleness error: no snapshot for {seconds}s")]
    Staleness { seconds: u64 },

    /// Control lane evicted buffered snapshots
    #[error("Channel overflow: {dropped} snapshot(s) dropped")]
    ChannelOverflow { dropped: u64 },

    /// Every consumer of the pipeline has gone away
    #[error("Channel closed: {message}")]
    ChannelClosed { message: String },

    /// The byte source is gone (fatal to acquisition)
    #[error("Source failure: {message}")]
    Source { message: String },

    /// An export sink failed to deliver an item
    #[error("Export error: {sink} - {message}")]
    Export { sink: String, message: String },

    /// A relay command could not be issued
    #[error("Relay error: {load} - {message}")]
    Relay { load: String, message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl MeterlinkError {
    /// Create a new framing error
    pub fn framing<S: Into<String>>(message: S) -> Self {
        MeterlinkError::Framing {
            message: message.into(),
        }
    }

    /// Create a new checksum error
    pub fn checksum(expected: u16, computed: u16) -> Self {
        MeterlinkError::Checksum { expected, computed }
    }

    /// Create a new malformed-checksum error
    pub fn malformed_checksum<S: Into<String>>(trailer: S) -> Self {
        MeterlinkError::MalformedChecksum {
            trailer: trailer.into(),
        }
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        MeterlinkError::Decode {
            message: message.into(),
        }
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(field: S, message: S) -> Self {
        MeterlinkError::Model {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new source error
    pub fn source_failure<S: Into<String>>(message: S) -> Self {
        MeterlinkError::Source {
            message: message.into(),
        }
    }

    /// Create a new channel-closed error
    pub fn channel_closed<S: Into<String>>(message: S) -> Self {
        MeterlinkError::ChannelClosed {
            message: message.into(),
        }
    }

    /// Create a new export error
    pub fn export<S: Into<String>>(sink: S, message: S) -> Self {
        MeterlinkError::Export {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Create a new relay error
    pub fn relay<S: Into<String>>(load: S, message: S) -> Self {
        MeterlinkError::Relay {
            load: load.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        MeterlinkError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        MeterlinkError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        MeterlinkError::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        MeterlinkError::Generic {
            message: message.into(),
        }
    }

    /// Whether the error must stop the acquisition process
    pub fn is_fatal(&self) -> bool {
        matches!(self, MeterlinkError::Source { .. })
    }
}

impl From<std::io::Error> for MeterlinkError {
    fn from(err: std::io::Error) -> Self {
        MeterlinkError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for MeterlinkError {
    fn from(err: serde_yaml::Error) -> Self {
        MeterlinkError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MeterlinkError {
    fn from(err: serde_json::Error) -> Self {
        MeterlinkError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for MeterlinkError {
    fn from(err: csv::Error) -> Self {
        MeterlinkError::io(err.to_string())
    }
}

impl From<tokio_serial::Error> for MeterlinkError {
    fn from(err: tokio_serial::Error) -> Self {
        MeterlinkError::source_failure(err.to_string())
    }
}

#[cfg(feature = "influx")]
impl From<reqwest::Error> for MeterlinkError {
    fn from(err: reqwest::Error) -> Self {
        MeterlinkError::export("influx".to_string(), err.to_string())
    }
}

impl From<chrono::ParseError> for MeterlinkError {
    fn from(err: chrono::ParseError) -> Self {
        MeterlinkError::decode(err.to_string())
    }
}
