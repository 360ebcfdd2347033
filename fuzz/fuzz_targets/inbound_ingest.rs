#![no_main]

use libfuzzer_sys::fuzz_target;
use trust_link::registry::ControllerId;
use trust_link::telemetry::TelemetryStore;

const MAX_MESSAGE_BYTES: usize = 16 * 1024;
const HISTORY_LIMIT: usize = 8;

fuzz_target!(|data: &[u8]| {
    let capped = &data[..data.len().min(MAX_MESSAGE_BYTES)];
    let text = String::from_utf8_lossy(capped);
    let controller = ControllerId::from("fuzz");
    let mut store = TelemetryStore::new(HISTORY_LIMIT);

    for now_ms in 0..3 {
        if store.ingest(&controller, &text, now_ms).is_err() {
            assert!(store.variables().is_empty());
            assert!(store.history().is_empty());
            return;
        }
    }
    assert!(store.history().len() <= HISTORY_LIMIT);
    for (key, entry) in store.variables().iter() {
        assert!(key.starts_with("fuzz:"));
        assert_eq!(entry.controller, controller);
    }
});
