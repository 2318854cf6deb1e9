//! Field decoding of validated frames
//!
//! Line grammar: `identifier(group)(group)...`. A group is a quantity
//! (`number*unit`), a `YYMMDDhhmmss` timestamp followed by `S` or `W`, or a
//! bare token which may be empty. Lines starting with `(` continue the value
//! of the previous line (older meters wrap the gas reading this way).

use super::crc::ValidatedFrame;
use super::obis;
use crate::error::{MeterlinkError, Result};
use chrono::offset::LocalResult;
use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use std::fmt;

/// Decimal fixed-point number exactly as it appeared on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoint {
    pub mantissa: i64,
    /// Digits after the decimal point
    pub scale: u8,
    /// Digits before the decimal point, leading zeros included
    pub int_digits: u8,
}

impl FixedPoint {
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
            || (digits.contains('.') && frac_part.is_empty())
        {
            return None;
        }
        let int_digits = u8::try_from(int_part.len()).ok()?;
        let scale = u8::try_from(frac_part.len()).ok()?;
        let magnitude: i64 = format!("{}{}", int_part, frac_part).parse().ok()?;
        Some(Self {
            mantissa: if negative { -magnitude } else { magnitude },
            scale,
            int_digits,
        })
    }

    pub fn to_f64(self) -> f64 {
        self.mantissa as f64 / 10f64.powi(i32::from(self.scale))
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = usize::from(self.scale);
        let width = usize::from(self.int_digits) + scale;
        let padded = format!("{:0>width$}", digits, width = width.max(scale + 1));
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        if scale == 0 {
            write!(f, "{}{}", sign, int_part)
        } else {
            write!(f, "{}{}.{}", sign, int_part, frac_part)
        }
    }
}

/// Number with its raw unit string
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: FixedPoint,
    pub unit: String,
}

/// Meter wall-clock time resolved to an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterTimestamp {
    pub local: NaiveDateTime,
    /// `S` marker (daylight-saving reading)
    pub dst: bool,
    pub utc: DateTime<Utc>,
}

impl MeterTimestamp {
    /// Wire representation, e.g. `211024195235S`
    pub fn raw(&self) -> String {
        format!(
            "{}{}",
            self.local.format("%y%m%d%H%M%S"),
            if self.dst { 'S' } else { 'W' }
        )
    }
}

/// Typed value of one line
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Quantity(Quantity),
    Timestamp(MeterTimestamp),
    Token(String),
    Composite(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_quantity(&self) -> Option<&Quantity> {
        match self {
            FieldValue::Quantity(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            FieldValue::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&MeterTimestamp> {
        match self {
            FieldValue::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    fn from_groups(mut groups: Vec<FieldValue>) -> Self {
        if groups.len() == 1 {
            groups.remove(0)
        } else {
            FieldValue::Composite(groups)
        }
    }

    fn into_groups(self) -> Vec<FieldValue> {
        match self {
            FieldValue::Composite(groups) => groups,
            other => vec![other],
        }
    }
}

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    pub code: String,
    pub value: FieldValue,
    /// Original line text (continuation lines joined)
    pub line: String,
}

/// All records of one frame plus the lines that failed to decode
#[derive(Debug)]
pub struct DecodedTelegram {
    /// Identification line without the leading `/`
    pub header: String,
    pub records: Vec<FieldRecord>,
    pub line_errors: Vec<MeterlinkError>,
}

/// Decodes lines, resolving timestamps in the meter's zone
#[derive(Debug, Clone, Copy)]
pub struct FieldDecoder {
    tz: Tz,
}

impl FieldDecoder {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Decode a single data line; header, blank and trailer lines yield `None`
    pub fn decode_line(&self, line: &str) -> Result<Option<FieldRecord>> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() || trimmed.starts_with('/') || trimmed.starts_with('!') {
            return Ok(None);
        }

        let open = trimmed
            .find('(')
            .ok_or_else(|| MeterlinkError::decode(format!("no value group in '{}'", trimmed)))?;
        let code = &trimmed[..open];
        if !obis::is_identifier(code) {
            return Err(MeterlinkError::decode(format!(
                "invalid identifier in '{}'",
                trimmed
            )));
        }

        let groups = self
            .parse_groups(&trimmed[open..])
            .map_err(|e| MeterlinkError::decode(format!("{} in '{}'", e, trimmed)))?;
        Ok(Some(FieldRecord {
            code: code.to_string(),
            value: FieldValue::from_groups(groups),
            line: trimmed.to_string(),
        }))
    }

    /// Decode every line of a validated frame
    pub fn decode_frame(&self, frame: &ValidatedFrame) -> DecodedTelegram {
        let mut header = String::new();
        let mut records: Vec<FieldRecord> = Vec::new();
        let mut line_errors = Vec::new();

        for line in frame.lines() {
            if let Some(id) = line.strip_prefix('/') {
                header = id.to_string();
                continue;
            }

            if line.starts_with('(') {
                let Some(previous) = records.last_mut() else {
                    line_errors.push(MeterlinkError::decode(format!(
                        "continuation without record: '{}'",
                        line
                    )));
                    continue;
                };
                match self.parse_groups(line) {
                    Ok(extra) => {
                        let mut groups = std::mem::replace(
                            &mut previous.value,
                            FieldValue::Token(String::new()),
                        )
                        .into_groups();
                        groups.extend(extra);
                        previous.value = FieldValue::from_groups(groups);
                        previous.line.push_str(line);
                    }
                    Err(e) => line_errors.push(e),
                }
                continue;
            }

            match self.decode_line(line) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => line_errors.push(e),
            }
        }

        DecodedTelegram {
            header,
            records,
            line_errors,
        }
    }

    fn parse_groups(&self, mut rest: &str) -> Result<Vec<FieldValue>> {
        let mut groups = Vec::new();
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('(')
                .ok_or_else(|| MeterlinkError::decode("expected '('"))?;
            let close = inner
                .find(')')
                .ok_or_else(|| MeterlinkError::decode("unterminated group"))?;
            let content = &inner[..close];
            if content.contains('(') {
                return Err(MeterlinkError::decode("nested group"));
            }
            groups.push(self.parse_group(content)?);
            rest = &inner[close + 1..];
        }
        if groups.is_empty() {
            return Err(MeterlinkError::decode("no value group"));
        }
        Ok(groups)
    }

    fn parse_group(&self, content: &str) -> Result<FieldValue> {
        if let Some((number, unit)) = content.split_once('*') {
            let value = FixedPoint::parse(number)
                .ok_or_else(|| MeterlinkError::decode(format!("bad number '{}'", number)))?;
            if unit.is_empty() {
                return Err(MeterlinkError::decode("empty unit"));
            }
            return Ok(FieldValue::Quantity(Quantity {
                value,
                unit: unit.to_string(),
            }));
        }

        let bytes = content.as_bytes();
        if bytes.len() == 13
            && bytes[..12].iter().all(u8::is_ascii_digit)
            && matches!(bytes[12], b'S' | b'W')
        {
            return self.parse_timestamp(content).map(FieldValue::Timestamp);
        }

        Ok(FieldValue::Token(content.to_string()))
    }

    /// Parse `YYMMDDhhmmss[SW]` in the decoder's zone
    pub fn parse_timestamp(&self, text: &str) -> Result<MeterTimestamp> {
        if text.len() != 13 || !text.is_ascii() {
            return Err(MeterlinkError::decode(format!(
                "bad timestamp '{}'",
                text
            )));
        }
        let dst = match &text[12..] {
            "S" => true,
            "W" => false,
            _ => {
                return Err(MeterlinkError::decode(format!(
                    "bad season marker in '{}'",
                    text
                )));
            }
        };
        let local = NaiveDateTime::parse_from_str(&format!("20{}", &text[..12]), "%Y%m%d%H%M%S")?;
        let utc = resolve_local(self.tz, local, dst).ok_or_else(|| {
            MeterlinkError::decode(format!("'{}' does not exist in {}", text, self.tz))
        })?;
        Ok(MeterTimestamp { local, dst, utc })
    }
}

/// Resolve a wall-clock reading using the season marker
///
/// The marker is authoritative: `W` means the zone's base offset and `S` the
/// base offset plus the DST saving (one hour when the zone has none at that
/// date). Inside a spring-forward gap only the standard reading exists.
fn resolve_local(tz: Tz, local: NaiveDateTime, dst: bool) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => {
            let offset = dt.offset();
            let base = offset.base_utc_offset();
            let total = if dst {
                let saving = offset.dst_offset();
                base + if saving.is_zero() {
                    TimeDelta::hours(1)
                } else {
                    saving
                }
            } else {
                base
            };
            Some((local - total).and_utc())
        }
        LocalResult::Ambiguous(earlier, later) => {
            let pick = [earlier, later]
                .into_iter()
                .find(|dt| dt.offset().dst_offset().is_zero() != dst)
                .unwrap_or(if dst { earlier } else { later });
            Some(pick.with_timezone(&Utc))
        }
        LocalResult::None => {
            if dst {
                return None;
            }
            let base = tz.offset_from_utc_datetime(&local).base_utc_offset();
            Some((local - base).and_utc())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> FieldDecoder {
        FieldDecoder::new(chrono_tz::Europe::Brussels)
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn fixed_point_keeps_wire_precision() {
        let fp = FixedPoint::parse("004248.198").unwrap();
        assert_eq!(fp.mantissa, 4_248_198);
        assert_eq!(fp.scale, 3);
        assert_eq!(fp.int_digits, 6);
        assert_eq!(fp.to_string(), "004248.198");
        assert!((fp.to_f64() - 4248.198).abs() < 1e-9);

        assert_eq!(FixedPoint::parse("999").unwrap().to_string(), "999");
        assert_eq!(FixedPoint::parse("-01.5").unwrap().to_f64(), -1.5);
        assert!(FixedPoint::parse("1.").is_none());
        assert!(FixedPoint::parse("abc").is_none());
        assert!(FixedPoint::parse("").is_none());
    }

    #[test]
    fn decodes_quantity_token_and_composite() {
        let d = decoder();

        let record = d.decode_line("1-0:1.7.0(00.507*kW)").unwrap().unwrap();
        assert_eq!(record.code, "1-0:1.7.0");
        let q = record.value.as_quantity().unwrap();
        assert_eq!(q.unit, "kW");
        assert_eq!(q.value.to_string(), "00.507");

        let record = d.decode_line("0-0:96.13.0()").unwrap().unwrap();
        assert_eq!(record.value, FieldValue::Token(String::new()));

        let record = d
            .decode_line("0-1:24.2.3(211024195005S)(03775.342*m3)")
            .unwrap()
            .unwrap();
        let FieldValue::Composite(groups) = record.value else {
            panic!("expected composite");
        };
        assert_eq!(groups.len(), 2);
        assert!(groups[0].as_timestamp().is_some());
        assert!(groups[1].as_quantity().is_some());
    }

    #[test]
    fn skips_non_data_lines() {
        let d = decoder();
        assert!(d.decode_line("").unwrap().is_none());
        assert!(d.decode_line("/FLU5\\253769484_A").unwrap().is_none());
        assert!(d.decode_line("!324A").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_lines() {
        let d = decoder();
        assert!(d.decode_line("1-0:1.7.0(00.507*kW").is_err());
        assert!(d.decode_line("1-0:1.7.0(00.507*kW)junk").is_err());
        assert!(d.decode_line("1-0:1.7.0(abc*kW)").is_err());
        assert!(d.decode_line("1-0:1.7.0").is_err());
        assert!(d.decode_line("1-0 :1.7.0(1)").is_err());
        assert!(d.decode_line("(00.507*kW)").is_err());
    }

    #[test]
    fn season_marker_selects_instant_in_fall_back_hour() {
        let d = decoder();
        let summer = d.parse_timestamp("211031023000S").unwrap();
        let winter = d.parse_timestamp("211031023000W").unwrap();
        assert_eq!(summer.utc, utc("2021-10-31T00:30:00Z"));
        assert_eq!(winter.utc, utc("2021-10-31T01:30:00Z"));
        assert_eq!(winter.utc - summer.utc, TimeDelta::hours(1));
        assert_eq!(summer.raw(), "211031023000S");
    }

    #[test]
    fn season_marker_wins_outside_transitions() {
        let d = decoder();
        let normal = d.parse_timestamp("211024195235S").unwrap();
        assert_eq!(normal.utc, utc("2021-10-24T17:52:35Z"));

        // Meter still flagging summer time after the switch
        let stale = d.parse_timestamp("211101120000S").unwrap();
        assert_eq!(stale.utc, utc("2021-11-01T10:00:00Z"));
        let winter = d.parse_timestamp("211101120000W").unwrap();
        assert_eq!(winter.utc, utc("2021-11-01T11:00:00Z"));
    }

    #[test]
    fn spring_forward_gap_only_accepts_standard_time() {
        let d = decoder();
        let winter = d.parse_timestamp("220327023000W").unwrap();
        assert_eq!(winter.utc, utc("2022-03-27T01:30:00Z"));
        assert!(d.parse_timestamp("220327023000S").is_err());
    }

    #[test]
    fn rejects_impossible_dates() {
        let d = decoder();
        assert!(d.parse_timestamp("211332000000W").is_err());
        assert!(d.parse_timestamp("21103102300X").is_err());
    }
}
