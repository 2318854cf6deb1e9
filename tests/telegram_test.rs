mod common;

use meterlink::error::MeterlinkError;
use meterlink::snapshot::Snapshot;
use meterlink::telegram::{FrameAssembler, crc16, encode_telegram, validate};

fn decode_sample(bytes: &[u8]) -> Snapshot {
    let mut assembler = FrameAssembler::new(4096);
    let mut frames = assembler.push(bytes);
    assert_eq!(frames.len(), 1);
    let frame = validate(frames.remove(0).unwrap()).unwrap();
    let decoded = common::decoder().decode_frame(&frame);
    assert!(decoded.line_errors.is_empty(), "{:?}", decoded.line_errors);
    Snapshot::build(decoded, chrono::Utc::now()).unwrap()
}

#[test]
fn resyncs_after_garbage_and_truncated_frame() {
    let valid = common::sample_telegram();
    let mut stream = b"\x00\xffnoise\r\n".to_vec();
    stream.extend_from_slice(b"/ISK5\\2M550T-1012\r\n\r\n1-0:1.7.0(00.1");
    stream.extend_from_slice(&valid);

    let mut assembler = FrameAssembler::new(4096);
    let events = assembler.push(&stream);

    let frames: Vec<_> = events.iter().filter_map(|e| e.as_ref().ok()).collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].as_bytes(), valid.as_slice());
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Err(MeterlinkError::Framing { .. })))
    );
    assert_eq!(assembler.pending(), 0);
}

#[test]
fn frames_split_across_many_reads() {
    let valid = common::sample_telegram();
    let mut assembler = FrameAssembler::new(4096);
    let mut frames = Vec::new();
    for chunk in valid.chunks(7) {
        frames.extend(assembler.push(chunk));
    }
    assert_eq!(frames.len(), 1);
    assert!(frames[0].is_ok());
}

#[test]
fn sample_telegram_carries_known_checksum() {
    assert_eq!(crc16(b"123456789"), 0xBB3D);

    let bytes = common::sample_telegram();
    let trailer = &bytes[bytes.len() - 6..bytes.len() - 2];
    assert_eq!(trailer, common::SAMPLE_CRC.as_bytes());

    let mut assembler = FrameAssembler::new(4096);
    let frame = assembler.push(&bytes).remove(0).unwrap();
    let validated = validate(frame).unwrap();
    assert_eq!(validated.crc(), 0x324A);
}

#[test]
fn encoder_reproduces_wire_bytes() {
    let encoded = encode_telegram(common::HEADER, common::LINES);
    assert_eq!(encoded.as_slice(), common::SAMPLE_BYTES);
}

#[test]
fn flipped_body_byte_fails_checksum() {
    let mut bytes = common::sample_telegram();
    let pos = bytes
        .windows(6)
        .position(|w| w == b"00.507")
        .unwrap();
    bytes[pos + 5] = b'8';

    let mut assembler = FrameAssembler::new(4096);
    let frame = assembler.push(&bytes).remove(0).unwrap();
    let err = validate(frame).unwrap_err();
    assert!(matches!(
        err,
        MeterlinkError::Checksum {
            expected: 0x324A,
            ..
        }
    ));
}

#[test]
fn decodes_sample_into_snapshot() {
    let snapshot = decode_sample(&common::sample_telegram());

    assert_eq!(snapshot.meter_id, common::HEADER);
    assert_eq!(snapshot.energy.consumption_day, Some(4248.198));
    assert_eq!(snapshot.energy.injection_night, Some(908.264));
    assert_eq!(snapshot.consumption_kw, 0.507);
    assert_eq!(snapshot.injection_kw, 0.0);
    assert_eq!(snapshot.phases[0].voltage_v, Some(234.7));
    assert_eq!(snapshot.phases[2].current_a, Some(1.44));
    let gas = snapshot.gas.as_ref().unwrap();
    assert_eq!(gas.volume_m3, Some(3775.342));
    assert_eq!(gas.timestamp.unwrap().raw(), "211024195005S");
    assert!(snapshot.unknown.is_empty());
}

#[test]
fn reencoding_known_fields_reproduces_values() {
    let original = decode_sample(&common::sample_telegram());
    let lines = original.encode_known_fields();

    for expected in [
        "1-0:1.8.1(004248.198*kWh)",
        "1-0:1.7.0(00.507*kW)",
        "1-0:32.7.0(234.7*V)",
        "1-0:31.7.0(001.36*A)",
        "0-1:24.2.3(211024195005S)(03775.342*m3)",
    ] {
        assert!(lines.iter().any(|l| l == expected), "missing {}", expected);
    }

    let again = decode_sample(&encode_telegram(&original.meter_id, &lines));
    assert_eq!(again.measurements(), original.measurements());
    assert_eq!(again.timestamp, original.timestamp);
}

#[test]
fn season_marker_selects_offset() {
    let decoder = common::decoder();
    let summer = decoder.parse_timestamp("211031023000S").unwrap();
    let winter = decoder.parse_timestamp("211031023000W").unwrap();
    assert_eq!((winter.utc - summer.utc).num_hours(), 1);
    assert_eq!(summer.utc.to_rfc3339(), "2021-10-31T00:30:00+00:00");
}

#[test]
fn unknown_obis_line_passes_through() {
    let line = "1-0:99.97.0(1)(0-0:96.7.19)(211024195235S)(0000000237*s)";
    let mut lines: Vec<&str> = common::LINES.to_vec();
    lines.push(line);

    let snapshot = decode_sample(&encode_telegram(common::HEADER, &lines));
    assert_eq!(snapshot.unknown.len(), 1);
    assert_eq!(snapshot.unknown[0].code, "1-0:99.97.0");
    assert_eq!(snapshot.unknown[0].line, line);
}

#[test]
fn lettered_identifiers_are_kept_opaque() {
    let mut lines: Vec<&str> = common::LINES.to_vec();
    lines.push("0-0:C.1.0(12345678)");
    lines.push("C.1.0(87654321)");

    let snapshot = decode_sample(&encode_telegram(common::HEADER, &lines));
    let codes: Vec<&str> = snapshot.unknown.iter().map(|u| u.code.as_str()).collect();
    assert_eq!(codes, ["0-0:C.1.0", "C.1.0"]);
}
