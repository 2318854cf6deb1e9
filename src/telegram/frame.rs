//! Byte-stream framing
//!
//! The meter pushes telegrams back to back over a half-duplex line with no
//! length prefix. A frame starts at `/` and ends after `!`, four checksum
//! characters and CRLF. Anything between frames is noise and is skipped.

use crate::error::{MeterlinkError, Result};

const START: u8 = b'/';
const END: u8 = b'!';
/// `!` is followed by four checksum characters and CRLF
const TRAILER_LEN: usize = 6;

/// Immutable bytes of one telegram, `/` through the CRLF after the checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
    end_marker: usize,
}

impl RawFrame {
    /// Whole frame including the trailer
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes covered by the checksum: `/` up to and including `!`
    pub fn checked_region(&self) -> &[u8] {
        &self.bytes[..=self.end_marker]
    }

    /// The four characters following `!`
    pub fn checksum_field(&self) -> &[u8] {
        &self.bytes[self.end_marker + 1..self.end_marker + 5]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Incremental frame assembler
///
/// Feed it whatever the source returned; it keeps partial frames across
/// calls. Framing problems are reported inline as [`MeterlinkError::Framing`]
/// and never stop the assembler.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    in_frame: bool,
    end_marker: Option<usize>,
    max_frame_bytes: usize,
}

impl FrameAssembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_frame_bytes.min(4096)),
            in_frame: false,
            end_marker: None,
            max_frame_bytes,
        }
    }

    /// Bytes of the frame currently being assembled
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Consume a chunk and return every frame (or framing error) it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<RawFrame>> {
        let mut out = Vec::new();
        for &byte in chunk {
            if let Some(event) = self.push_byte(byte) {
                out.push(event);
            }
        }
        out
    }

    fn push_byte(&mut self, byte: u8) -> Option<Result<RawFrame>> {
        if byte == START {
            let discarded = self.in_frame;
            let pending = self.buffer.len();
            self.restart();
            return discarded.then(|| {
                Err(MeterlinkError::framing(format!(
                    "start marker inside frame, discarded {} buffered byte(s)",
                    pending
                )))
            });
        }

        if !self.in_frame {
            return None;
        }

        self.buffer.push(byte);
        if self.buffer.len() > self.max_frame_bytes {
            self.reset();
            return Some(Err(MeterlinkError::framing(format!(
                "frame exceeds {} bytes, waiting for next start marker",
                self.max_frame_bytes
            ))));
        }

        let Some(marker) = self.end_marker else {
            if byte == END {
                self.end_marker = Some(self.buffer.len() - 1);
            }
            return None;
        };

        // Position within the trailer, 1 = first checksum character
        let position = self.buffer.len() - 1 - marker;
        let valid = match position {
            1..=4 => !matches!(byte, b'\r' | b'\n' | END),
            5 => byte == b'\r',
            _ => byte == b'\n',
        };
        if !valid {
            self.reset();
            return Some(Err(MeterlinkError::framing(
                "malformed checksum trailer".to_string(),
            )));
        }

        if position == TRAILER_LEN {
            let bytes = std::mem::take(&mut self.buffer);
            self.reset();
            return Some(Ok(RawFrame {
                bytes,
                end_marker: marker,
            }));
        }
        None
    }

    fn restart(&mut self) {
        self.buffer.clear();
        self.buffer.push(START);
        self.in_frame = true;
        self.end_marker = None;
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_frame = false;
        self.end_marker = None;
    }
}
