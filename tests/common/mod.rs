#![allow(dead_code)]

use meterlink::snapshot::Snapshot;
use meterlink::telegram::{DecodedTelegram, FieldDecoder};

pub const HEADER: &str = "FLU5\\253769484_A";

/// Data lines of a captured Belgian three-phase telegram with gas meter
pub const LINES: &[&str] = &[
    "0-0:96.1.4(50217)",
    "0-0:96.1.1(3153414733313031303231363035)",
    "0-0:1.0.0(211024195235S)",
    "1-0:1.8.1(004248.198*kWh)",
    "1-0:1.8.2(006615.642*kWh)",
    "1-0:2.8.1(002278.958*kWh)",
    "1-0:2.8.2(000908.264*kWh)",
    "0-0:96.14.0(0002)",
    "1-0:1.7.0(00.507*kW)",
    "1-0:2.7.0(00.000*kW)",
    "1-0:21.7.0(00.245*kW)",
    "1-0:41.7.0(00.000*kW)",
    "1-0:61.7.0(00.261*kW)",
    "1-0:22.7.0(00.000*kW)",
    "1-0:42.7.0(00.000*kW)",
    "1-0:62.7.0(00.000*kW)",
    "1-0:32.7.0(234.7*V)",
    "1-0:52.7.0(000.0*V)",
    "1-0:72.7.0(234.4*V)",
    "1-0:31.7.0(001.36*A)",
    "1-0:51.7.0(000.00*A)",
    "1-0:71.7.0(001.44*A)",
    "0-0:96.3.10(1)",
    "0-0:17.0.0(999.9*kW)",
    "1-0:31.4.0(999*A)",
    "0-0:96.13.0()",
    "0-1:24.1.0(003)",
    "0-1:96.1.1(37464C4F32313139303333373333)",
    "0-1:24.4.0(1)",
    "0-1:24.2.3(211024195005S)(03775.342*m3)",
];

/// Checksum trailer of the sample telegram
pub const SAMPLE_CRC: &str = "324A";

/// The sample exactly as it arrives on the wire, trailer included.
/// The trailer was computed with a bitwise CRC-16/ARC outside this crate.
pub const SAMPLE_BYTES: &[u8] = b"/FLU5\\253769484_A\r\n\
    \r\n\
    0-0:96.1.4(50217)\r\n\
    0-0:96.1.1(3153414733313031303231363035)\r\n\
    0-0:1.0.0(211024195235S)\r\n\
    1-0:1.8.1(004248.198*kWh)\r\n\
    1-0:1.8.2(006615.642*kWh)\r\n\
    1-0:2.8.1(002278.958*kWh)\r\n\
    1-0:2.8.2(000908.264*kWh)\r\n\
    0-0:96.14.0(0002)\r\n\
    1-0:1.7.0(00.507*kW)\r\n\
    1-0:2.7.0(00.000*kW)\r\n\
    1-0:21.7.0(00.245*kW)\r\n\
    1-0:41.7.0(00.000*kW)\r\n\
    1-0:61.7.0(00.261*kW)\r\n\
    1-0:22.7.0(00.000*kW)\r\n\
    1-0:42.7.0(00.000*kW)\r\n\
    1-0:62.7.0(00.000*kW)\r\n\
    1-0:32.7.0(234.7*V)\r\n\
    1-0:52.7.0(000.0*V)\r\n\
    1-0:72.7.0(234.4*V)\r\n\
    1-0:31.7.0(001.36*A)\r\n\
    1-0:51.7.0(000.00*A)\r\n\
    1-0:71.7.0(001.44*A)\r\n\
    0-0:96.3.10(1)\r\n\
    0-0:17.0.0(999.9*kW)\r\n\
    1-0:31.4.0(999*A)\r\n\
    0-0:96.13.0()\r\n\
    0-1:24.1.0(003)\r\n\
    0-1:96.1.1(37464C4F32313139303333373333)\r\n\
    0-1:24.4.0(1)\r\n\
    0-1:24.2.3(211024195005S)(03775.342*m3)\r\n\
    !324A\r\n";

pub fn sample_telegram() -> Vec<u8> {
    SAMPLE_BYTES.to_vec()
}

pub fn decoder() -> FieldDecoder {
    FieldDecoder::new(chrono_tz::Europe::Brussels)
}

/// Minimal snapshot carrying only the two total power fields
pub fn power_snapshot(consumption_kw: f64, injection_kw: f64) -> Snapshot {
    let decoder = decoder();
    let lines = [
        format!("1-0:1.7.0({:06.3}*kW)", consumption_kw),
        format!("1-0:2.7.0({:06.3}*kW)", injection_kw),
    ];
    let records = lines
        .iter()
        .filter_map(|l| decoder.decode_line(l).unwrap())
        .collect();
    Snapshot::build(
        DecodedTelegram {
            header: HEADER.to_string(),
            records,
            line_errors: Vec::new(),
        },
        chrono::Utc::now(),
    )
    .unwrap()
}
