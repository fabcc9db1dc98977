#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);
    if let Ok(parsed) = rulescope::parse(&s) {
        for rule in &parsed.rules {
            let _ = rulescope::extract(rule);
        }
    }
});
