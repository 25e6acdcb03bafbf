#![no_main]
use ecat::header::decode_header;
use ecat::version::match_version;
use ecat::SchemaRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let registry = match SchemaRegistry::builtin() {
        Ok(registry) => registry,
        Err(_) => return,
    };
    let _ = match_version(data, &registry);
    for schema in registry.schemas() {
        let _ = decode_header(data, schema);
    }
});
