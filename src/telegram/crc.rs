//! CRC-16/ARC validation of raw frames

use super::frame::RawFrame;
use crate::error::{MeterlinkError, Result};

/// CRC-16/ARC: reflected polynomial 0xA001, init 0, no final XOR
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// A frame whose checksum matched; only these are decoded
#[derive(Debug, Clone)]
pub struct ValidatedFrame {
    text: String,
    crc: u16,
}

impl ValidatedFrame {
    /// Frame text from `/` up to (excluding) `!`
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Body lines, header first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }
}

fn parse_checksum(field: &[u8]) -> Option<u16> {
    if field.len() != 4 || !field.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(field).ok()?;
    u16::from_str_radix(text, 16).ok()
}

/// Verify the trailer of `frame` against its checked region
pub fn validate(frame: RawFrame) -> Result<ValidatedFrame> {
    let expected = parse_checksum(frame.checksum_field()).ok_or_else(|| {
        MeterlinkError::malformed_checksum(String::from_utf8_lossy(frame.checksum_field()))
    })?;

    let region = frame.checked_region();
    let computed = crc16(region);
    if computed != expected {
        return Err(MeterlinkError::checksum(expected, computed));
    }

    // Drop the end marker itself
    let body = &region[..region.len() - 1];
    Ok(ValidatedFrame {
        text: String::from_utf8_lossy(body).into_owned(),
        crc: computed,
    })
}
