//! Fuzz testing for resource specification parsing and matching.
//!
//! Checks that arbitrary resource strings and request lines never panic,
//! and that anything that parses survives a display/parse cycle with the
//! same matching behaviour.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_resources
//! cargo +nightly fuzz run fuzz_resources -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wafflehaus::resource::{matches, parse_resources};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    resources: &'a str,
    method: &'a str,
    path: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let Ok(config) = parse_resources(input.resources) else {
        return;
    };

    let matched = matches(input.method, input.path, "", &config);

    let reparsed = parse_resources(&config.to_string()).expect("display output must parse");
    assert_eq!(matched, matches(input.method, input.path, "", &reparsed));
});
