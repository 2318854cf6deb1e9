//! Telegram rendering
//!
//! Produces wire text for records and whole telegrams, including the CRC
//! trailer. Used by replay recordings and to check that decoded values
//! survive a round trip at the precision the meter publishes.

use super::crc::crc16;
use super::decode::{FieldRecord, FieldValue};
use super::obis::ObisField;

fn encode_value(value: &FieldValue, out: &mut String) {
    match value {
        FieldValue::Quantity(q) => {
            out.push('(');
            out.push_str(&q.value.to_string());
            out.push('*');
            out.push_str(&q.unit);
            out.push(')');
        }
        FieldValue::Timestamp(ts) => {
            out.push('(');
            out.push_str(&ts.raw());
            out.push(')');
        }
        FieldValue::Token(t) => {
            out.push('(');
            out.push_str(t);
            out.push(')');
        }
        FieldValue::Composite(groups) => {
            for group in groups {
                encode_value(group, out);
            }
        }
    }
}

/// Render a record as `identifier(group)...`
pub fn encode_record(record: &FieldRecord) -> String {
    let mut line = record.code.clone();
    encode_value(&record.value, &mut line);
    line
}

/// Render a quantity at the precision the table declares for `field`
pub fn encode_quantity(field: &ObisField, value: f64, unit: &str) -> String {
    let width = if field.decimals == 0 {
        field.int_digits
    } else {
        field.int_digits + field.decimals + 1
    };
    format!(
        "{}({:0width$.prec$}*{})",
        field.code,
        value,
        unit,
        width = width,
        prec = field.decimals
    )
}

/// Assemble a complete telegram: header, blank line, data lines, `!` and CRC
pub fn encode_telegram<I, S>(header: &str, lines: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut text = format!("/{}\r\n\r\n", header);
    for line in lines {
        text.push_str(line.as_ref());
        text.push_str("\r\n");
    }
    text.push('!');
    let crc = crc16(text.as_bytes());
    let mut bytes = text.into_bytes();
    bytes.extend_from_slice(format!("{:04X}\r\n", crc).as_bytes());
    bytes
}
