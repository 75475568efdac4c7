//! Fuzz testing for the allocation pool engine.
//!
//! Arbitrary subnet bodies go through `apply_default_policy`; whatever it
//! returns must only hold pools inside the usable range of the CIDR, and
//! running it again must not change the result.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_allocation
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value, json};
use wafflehaus::allocation::{EmptyPoolPolicy, IpVersion, apply_default_policy, default_pool, parse_pools};

#[derive(Debug, Arbitrary)]
struct Input {
    v6: bool,
    base: u128,
    prefix: u8,
    pools: Vec<(u128, u128)>,
}

fn address(v6: bool, raw: u128) -> String {
    if v6 {
        std::net::Ipv6Addr::from(raw).to_string()
    } else {
        std::net::Ipv4Addr::from(raw as u32).to_string()
    }
}

fuzz_target!(|input: Input| {
    let (version, max_prefix) = if input.v6 { (IpVersion::V6, 128) } else { (IpVersion::V4, 32) };
    let cidr = format!("{}/{}", address(input.v6, input.base), input.prefix % (max_prefix + 1));

    let pools: Vec<Value> = input
        .pools
        .iter()
        .take(16)
        .map(|(start, end)| json!({"start": address(input.v6, *start), "end": address(input.v6, *end)}))
        .collect();

    let mut subnet = Map::new();
    subnet.insert("cidr".to_string(), json!(cidr));
    subnet.insert("ip_version".to_string(), json!(version.number()));
    subnet.insert("allocation_pools".to_string(), Value::Array(pools));

    let Ok(once) = apply_default_policy(subnet, EmptyPoolPolicy::Keep) else {
        return;
    };

    let usable = default_pool(&cidr, version).expect("accepted subnet has a usable range");
    let result = parse_pools(&once["allocation_pools"], version).expect("output pools parse");
    for pool in &result {
        assert!(usable.contains(&pool.start()) && usable.contains(&pool.end()));
    }

    let twice = apply_default_policy(once.clone(), EmptyPoolPolicy::Keep).expect("idempotent");
    assert_eq!(once, twice);
});
