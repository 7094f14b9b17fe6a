//! Fuzz test for rate rule parsing
//!
//! Any string must either parse into a rule map whose limiters can be
//! built and exercised, or fail with a configuration error.
//!
//! Run with: cargo +nightly fuzz run rate_rules_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use trellis_ratelimit::{parse_rules, Limiters};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(rules) = parse_rules(raw) {
        let ops: Vec<String> = rules.keys().cloned().collect();
        let group = Limiters::new(rules, 4);
        for op in &ops {
            let _ = group.reached("fuzz", op);
        }
    }
});
