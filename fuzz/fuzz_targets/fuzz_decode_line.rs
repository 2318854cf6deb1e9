#![no_main]

use libfuzzer_sys::fuzz_target;
use meterlink::telegram::FieldDecoder;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let decoder = FieldDecoder::new(chrono_tz::Europe::Brussels);
        let _ = decoder.decode_line(line);
    }
});
