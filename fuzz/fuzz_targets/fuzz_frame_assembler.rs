#![no_main]

use libfuzzer_sys::fuzz_target;
use meterlink::telegram::{FrameAssembler, validate};

fuzz_target!(|data: &[u8]| {
    let mut assembler = FrameAssembler::new(1024);
    for chunk in data.chunks(17) {
        for frame in assembler.push(chunk).into_iter().flatten() {
            let _ = validate(frame);
        }
        assert!(assembler.pending() <= 1024);
    }
});
