#![no_main]
use ecat::ReaderOptions;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let _ = ReaderOptions::new().read_stream(Cursor::new(data));
});
