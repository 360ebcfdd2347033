#![no_main]

use libfuzzer_sys::fuzz_target;
use trust_link::program;

const MAX_SOURCE_BYTES: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let capped = &data[..data.len().min(MAX_SOURCE_BYTES)];
    let source = String::from_utf8_lossy(capped);
    let output = program::validate("fuzz-st", &source);
    assert_eq!(output.success, output.ast.is_some());
    assert_eq!(output.success, output.errors().next().is_none());
    let lines = u32::try_from(source.lines().count() + 1).unwrap_or(u32::MAX);
    assert!(output
        .diagnostics
        .iter()
        .all(|diagnostic| diagnostic.line >= 1 && diagnostic.line <= lines));
});
