//! Allocation pool arithmetic for subnet create requests.
//!
//! Every subnet gets a default allocation pool that keeps a few addresses
//! at each end of the CIDR out of circulation:
//!
//! | Family | First usable           | Last usable         |
//! |--------|------------------------|---------------------|
//! | IPv4   | network + 5            | broadcast - 1       |
//! | IPv6   | network + 10           | last address - 1    |
//!
//! Caller-supplied pools are sorted, merged into the fewest contiguous
//! `{start, end}` ranges and clipped to that range. The work is a single
//! sort plus a linear sweep, so it stays cheap however many pools a request
//! carries; [`MAX_ALLOCATION_POOLS`] bounds that count anyway.
//!
//! All arithmetic is done on `u128` values with an explicit width of 32 or
//! 128 bits. Addresses are strings only at the JSON boundary.
//!
//! Nothing in this module logs or performs I/O.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigurationError, ValidationError};

// =============================================================================
// IP Version
// =============================================================================

/// Address family of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Address width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Addresses reserved after the network address.
    pub const fn reserved_offset(self) -> u128 {
        match self {
            IpVersion::V4 => 5,
            IpVersion::V6 => 10,
        }
    }

    /// The `ip_version` number used on the wire.
    pub const fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// Decode a JSON `ip_version` value. Only the integers 4 and 6 are accepted.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        value
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(|n| Self::try_from(n).ok())
            .ok_or_else(|| ValidationError::UnsupportedIpVersion(value.to_string()))
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = ValidationError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(ValidationError::UnsupportedIpVersion(other.to_string())),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv{}", self.number())
    }
}

fn to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(*v4)),
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

fn from_bits(version: IpVersion, value: u128) -> IpAddr {
    match version {
        // Values of a V4 set never exceed u32::MAX
        IpVersion::V4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IpVersion::V6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Mask with the low `host_bits` bits set.
fn host_mask(host_bits: u32) -> u128 {
    if host_bits == 0 {
        0
    } else {
        u128::MAX >> (128 - host_bits)
    }
}

// =============================================================================
// Allocation Pool
// =============================================================================

/// Inclusive range of addresses of one family, `start <= end`.
///
/// Serializes as `{"start": "<addr>", "end": "<addr>"}`. Deserializing goes
/// through [`AllocationPool::new`], so an inverted or mixed-family pair is
/// refused there too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PoolBounds")]
pub struct AllocationPool {
    start: IpAddr,
    end: IpAddr,
}

impl AllocationPool {
    /// Build a pool, returning `None` when the families differ or `start > end`.
    pub fn new(start: IpAddr, end: IpAddr) -> Option<Self> {
        if IpVersion::of(&start) != IpVersion::of(&end) || to_bits(&start) > to_bits(&end) {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    pub fn version(&self) -> IpVersion {
        IpVersion::of(&self.start)
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        IpVersion::of(addr) == self.version()
            && (to_bits(&self.start)..=to_bits(&self.end)).contains(&to_bits(addr))
    }

    fn to_json(self) -> Value {
        serde_json::json!({
            "start": self.start.to_string(),
            "end": self.end.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct PoolBounds {
    start: IpAddr,
    end: IpAddr,
}

impl TryFrom<PoolBounds> for AllocationPool {
    type Error = ValidationError;

    fn try_from(bounds: PoolBounds) -> Result<Self, Self::Error> {
        Self::new(bounds.start, bounds.end).ok_or_else(|| ValidationError::InvalidPoolRange {
            start: bounds.start.to_string(),
            end: bounds.end.to_string(),
        })
    }
}

impl fmt::Display for AllocationPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// =============================================================================
// Range Arithmetic
// =============================================================================

/// Sorted, disjoint, non-adjacent inclusive ranges of one address family.
#[derive(Debug, Clone)]
struct RangeSet {
    version: IpVersion,
    ranges: Vec<(u128, u128)>,
}

impl RangeSet {
    /// Collect the pools of `version`, then sort and merge them in one pass.
    fn from_pools(version: IpVersion, pools: &[AllocationPool]) -> Self {
        let mut spans: Vec<(u128, u128)> = pools
            .iter()
            .filter(|pool| pool.version() == version)
            .map(|pool| (to_bits(&pool.start), to_bits(&pool.end)))
            .collect();
        spans.sort_unstable();

        let mut ranges: Vec<(u128, u128)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match ranges.last_mut() {
                Some((_, last)) if start <= last.saturating_add(1) => *last = (*last).max(end),
                _ => ranges.push((start, end)),
            }
        }

        Self { version, ranges }
    }

    /// Keep only the addresses inside `[first, last]`.
    fn clip(mut self, first: u128, last: u128) -> Self {
        self.ranges = self
            .ranges
            .into_iter()
            .filter_map(|(start, end)| {
                let (start, end) = (start.max(first), end.min(last));
                (start <= end).then_some((start, end))
            })
            .collect();
        self
    }

    fn into_pools(self) -> Vec<AllocationPool> {
        self.ranges
            .into_iter()
            .map(|(start, end)| AllocationPool {
                start: from_bits(self.version, start),
                end: from_bits(self.version, end),
            })
            .collect()
    }
}

// =============================================================================
// Public Operations
// =============================================================================

/// Compute the default allocation pool of a subnet.
///
/// # Errors
///
/// - [`ValidationError::InvalidCidr`] when `cidr` does not parse
/// - [`ValidationError::CidrVersionMismatch`] when the family disagrees with `version`
/// - [`ValidationError::CidrTooSmall`] when the reserved addresses leave nothing usable
pub fn default_pool(cidr: &str, version: IpVersion) -> Result<AllocationPool, ValidationError> {
    let network =
        IpNetwork::from_str(cidr.trim()).map_err(|_| ValidationError::InvalidCidr(cidr.to_string()))?;

    if IpVersion::of(&network.ip()) != version {
        return Err(ValidationError::CidrVersionMismatch {
            cidr: cidr.to_string(),
            ip_version: version.number(),
        });
    }

    let base = to_bits(&network.network());
    let last = base | host_mask(version.bits() - u32::from(network.prefix()));

    let too_small = || ValidationError::CidrTooSmall(cidr.to_string());
    let start = base.checked_add(version.reserved_offset()).ok_or_else(too_small)?;
    let end = last.checked_sub(1).ok_or_else(too_small)?;
    if start > end {
        return Err(too_small());
    }

    Ok(AllocationPool {
        start: from_bits(version, start),
        end: from_bits(version, end),
    })
}

/// Clip `requested` pools to `default` and coalesce the result.
///
/// Pools of a different family than `default` contribute nothing. An empty
/// vector means no requested address is usable; deciding what to do about
/// that is up to the caller.
pub fn intersect_and_coalesce(
    requested: &[AllocationPool],
    default: &AllocationPool,
) -> Vec<AllocationPool> {
    RangeSet::from_pools(default.version(), requested)
        .clip(to_bits(&default.start), to_bits(&default.end))
        .into_pools()
}

/// Maximum number of entries accepted in one `allocation_pools` array.
pub const MAX_ALLOCATION_POOLS: usize = 1024;

/// Decode a JSON `allocation_pools` array.
///
/// Malformed pools are reported, never dropped.
pub fn parse_pools(value: &Value, version: IpVersion) -> Result<Vec<AllocationPool>, ValidationError> {
    let entries = value.as_array().ok_or(ValidationError::MalformedPools)?;
    if entries.len() > MAX_ALLOCATION_POOLS {
        return Err(ValidationError::TooManyPools {
            count: entries.len(),
            max: MAX_ALLOCATION_POOLS,
        });
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let object = entry
                .as_object()
                .ok_or(ValidationError::MalformedPool { index })?;
            let start = pool_address(object, index, "start", version)?;
            let end = pool_address(object, index, "end", version)?;
            AllocationPool::new(start, end).ok_or(ValidationError::InvertedPool { index })
        })
        .collect()
}

fn pool_address(
    object: &Map<String, Value>,
    index: usize,
    field: &'static str,
    version: IpVersion,
) -> Result<IpAddr, ValidationError> {
    let raw = object
        .get(field)
        .ok_or(ValidationError::MissingPoolField { index, field })?;

    let invalid = || ValidationError::InvalidPoolAddress {
        index,
        field,
        value: raw.as_str().map_or_else(|| raw.to_string(), str::to_string),
    };

    let addr = raw
        .as_str()
        .and_then(|s| IpAddr::from_str(s.trim()).ok())
        .ok_or_else(invalid)?;

    if IpVersion::of(&addr) != version {
        return Err(ValidationError::PoolVersionMismatch {
            index,
            field,
            value: addr.to_string(),
            ip_version: version.number(),
        });
    }
    Ok(addr)
}

// =============================================================================
// Subnet Policy
// =============================================================================

/// What to forward when requested pools share no address with the default pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyPoolPolicy {
    /// Forward the empty list.
    #[default]
    Keep,
    /// Substitute the default pool.
    Default,
    /// Fail with [`ValidationError::NoPoolOverlap`].
    Reject,
}

impl FromStr for EmptyPoolPolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "default" => Ok(Self::Default),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigurationError::UnknownEmptyPoolPolicy(other.to_string())),
        }
    }
}

/// Pools computed for one subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPlan {
    pub cidr: String,
    pub default_pool: AllocationPool,
    /// `None` when the subnet did not ask for specific pools.
    pub requested: Option<Vec<AllocationPool>>,
    pub pools: Vec<AllocationPool>,
}

impl PoolPlan {
    /// Build the plan for a decoded subnet object.
    ///
    /// A missing `ip_version` is taken from the CIDR family.
    pub fn for_subnet(subnet: &Map<String, Value>) -> Result<Self, ValidationError> {
        let cidr = match subnet.get("cidr") {
            None | Some(Value::Null) => return Err(ValidationError::MissingSubnetField("cidr")),
            Some(Value::String(cidr)) => cidr.clone(),
            Some(other) => return Err(ValidationError::InvalidCidr(other.to_string())),
        };

        let version = match subnet.get("ip_version") {
            None | Some(Value::Null) => IpNetwork::from_str(cidr.trim())
                .map(|net| IpVersion::of(&net.ip()))
                .map_err(|_| ValidationError::InvalidCidr(cidr.clone()))?,
            Some(value) => IpVersion::from_json(value)?,
        };

        let default_pool = default_pool(&cidr, version)?;

        let (requested, pools) = match subnet.get("allocation_pools") {
            None | Some(Value::Null) => (None, vec![default_pool]),
            Some(value) => {
                let requested = parse_pools(value, version)?;
                let pools = intersect_and_coalesce(&requested, &default_pool);
                (Some(requested), pools)
            }
        };

        Ok(Self {
            cidr,
            default_pool,
            requested,
            pools,
        })
    }

    /// True when pools were requested but none of them survived clipping.
    pub fn is_empty_intersection(&self) -> bool {
        self.requested.is_some() && self.pools.is_empty()
    }

    /// Final pools after applying `policy` to an empty intersection.
    pub fn resolve(self, policy: EmptyPoolPolicy) -> Result<Vec<AllocationPool>, ValidationError> {
        if !self.is_empty_intersection() {
            return Ok(self.pools);
        }
        match policy {
            EmptyPoolPolicy::Keep => Ok(self.pools),
            EmptyPoolPolicy::Default => Ok(vec![self.default_pool]),
            EmptyPoolPolicy::Reject => Err(ValidationError::NoPoolOverlap(self.cidr)),
        }
    }
}

/// Rewrite a subnet's `allocation_pools` with the default IP policy.
///
/// Every other key is carried through untouched.
pub fn apply_default_policy(
    mut subnet: Map<String, Value>,
    policy: EmptyPoolPolicy,
) -> Result<Map<String, Value>, ValidationError> {
    let pools = PoolPlan::for_subnet(&subnet)?.resolve(policy)?;
    subnet.insert(
        "allocation_pools".to_string(),
        Value::Array(pools.into_iter().map(AllocationPool::to_json).collect()),
    );
    Ok(subnet)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool(start: &str, end: &str) -> AllocationPool {
        AllocationPool::new(start.parse().unwrap(), end.parse().unwrap()).unwrap()
    }

    fn subnet(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    // =========================================================================
    // default_pool
    // =========================================================================

    #[test]
    fn test_default_pool_ipv4() {
        let pool = default_pool("192.168.199.0/24", IpVersion::V4).unwrap();
        assert_eq!(pool.start().to_string(), "192.168.199.5");
        assert_eq!(pool.end().to_string(), "192.168.199.254");
    }

    #[test]
    fn test_default_pool_ipv6() {
        let pool = default_pool("2607:f0d0:1002:51::0/96", IpVersion::V6).unwrap();
        assert_eq!(pool.start().to_string(), "2607:f0d0:1002:51::a");
        assert_eq!(pool.end().to_string(), "2607:f0d0:1002:51::ffff:fffe");
    }

    #[test]
    fn test_default_pool_uses_network_address() {
        // Host bits set in the CIDR are masked off
        let default = default_pool("10.1.2.77/24", IpVersion::V4).unwrap();
        assert_eq!(default, pool("10.1.2.5", "10.1.2.254"));
        assert!(default.contains(&"10.1.2.100".parse().unwrap()));
        assert!(!default.contains(&"10.1.2.255".parse().unwrap()));
    }

    #[test]
    fn test_default_pool_stays_within_cidr() {
        for (cidr, version) in [
            ("10.0.0.0/8", IpVersion::V4),
            ("172.16.4.0/28", IpVersion::V4),
            ("0.0.0.0/0", IpVersion::V4),
            ("fd00::/64", IpVersion::V6),
            ("::/0", IpVersion::V6),
            ("2001:db8::/124", IpVersion::V6),
        ] {
            let pool = default_pool(cidr, version).unwrap();
            let net: IpNetwork = cidr.parse().unwrap();
            assert!(to_bits(&pool.start()) <= to_bits(&pool.end()), "{cidr}");
            assert!(net.contains(pool.start()), "{cidr}");
            assert!(net.contains(pool.end()), "{cidr}");
        }
    }

    #[test]
    fn test_default_pool_too_small() {
        assert_eq!(
            default_pool("10.0.0.0/30", IpVersion::V4),
            Err(ValidationError::CidrTooSmall("10.0.0.0/30".into()))
        );
        assert!(matches!(
            default_pool("10.0.0.1/32", IpVersion::V4),
            Err(ValidationError::CidrTooSmall(_))
        ));
        assert!(matches!(
            default_pool("2001:db8::/125", IpVersion::V6),
            Err(ValidationError::CidrTooSmall(_))
        ));
        // Smallest usable networks hold exactly one address
        assert_eq!(
            default_pool("10.0.0.0/29", IpVersion::V4).unwrap(),
            pool("10.0.0.5", "10.0.0.6")
        );
    }

    #[test]
    fn test_default_pool_invalid_cidr() {
        for cidr in ["", "not-a-cidr", "10.0.0.0/33", "300.0.0.0/24"] {
            assert!(
                matches!(
                    default_pool(cidr, IpVersion::V4),
                    Err(ValidationError::InvalidCidr(_))
                ),
                "{cidr:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_default_pool_version_mismatch() {
        assert!(matches!(
            default_pool("192.168.0.0/24", IpVersion::V6),
            Err(ValidationError::CidrVersionMismatch { ip_version: 6, .. })
        ));
        assert!(matches!(
            default_pool("fd00::/64", IpVersion::V4),
            Err(ValidationError::CidrVersionMismatch { ip_version: 4, .. })
        ));
    }

    // =========================================================================
    // intersect_and_coalesce
    // =========================================================================

    #[test]
    fn test_wider_request_yields_default() {
        let default = default_pool("192.168.199.0/24", IpVersion::V4).unwrap();
        let result =
            intersect_and_coalesce(&[pool("192.168.199.0", "192.168.199.255")], &default);
        assert_eq!(result, vec![default]);
    }

    #[test]
    fn test_narrower_request_is_preserved() {
        let default = default_pool("192.168.199.0/24", IpVersion::V4).unwrap();
        let requested = pool("192.168.199.85", "192.168.199.100");
        assert_eq!(intersect_and_coalesce(&[requested], &default), vec![requested]);
    }

    #[test]
    fn test_disjoint_requests_sorted_by_start() {
        let default = default_pool("192.168.199.0/24", IpVersion::V4).unwrap();
        let low = pool("192.168.199.10", "192.168.199.20");
        let high = pool("192.168.199.100", "192.168.199.150");

        assert_eq!(intersect_and_coalesce(&[high, low], &default), vec![low, high]);
    }

    #[test]
    fn test_partial_overlap_is_clipped() {
        let default = default_pool("192.168.199.0/24", IpVersion::V4).unwrap();
        let result = intersect_and_coalesce(
            &[
                pool("192.168.199.0", "192.168.199.9"),
                pool("192.168.199.250", "192.168.199.255"),
            ],
            &default,
        );
        assert_eq!(
            result,
            vec![
                pool("192.168.199.5", "192.168.199.9"),
                pool("192.168.199.250", "192.168.199.254"),
            ]
        );
    }

    #[test]
    fn test_adjacent_and_overlapping_requests_merge() {
        let default = default_pool("10.0.0.0/24", IpVersion::V4).unwrap();
        let result = intersect_and_coalesce(
            &[
                pool("10.0.0.10", "10.0.0.20"),
                pool("10.0.0.21", "10.0.0.30"),
                pool("10.0.0.25", "10.0.0.40"),
            ],
            &default,
        );
        assert_eq!(result, vec![pool("10.0.0.10", "10.0.0.40")]);
    }

    #[test]
    fn test_no_overlap_is_empty() {
        let default = default_pool("10.0.0.0/24", IpVersion::V4).unwrap();
        assert!(intersect_and_coalesce(&[pool("10.0.0.0", "10.0.0.4")], &default).is_empty());
        assert!(intersect_and_coalesce(&[pool("10.0.1.0", "10.0.1.255")], &default).is_empty());
        assert!(intersect_and_coalesce(&[], &default).is_empty());
    }

    #[test]
    fn test_other_family_contributes_nothing() {
        let default = default_pool("10.0.0.0/24", IpVersion::V4).unwrap();
        assert!(intersect_and_coalesce(&[pool("fd00::1", "fd00::ff")], &default).is_empty());
    }

    #[test]
    fn test_ipv6_intersection() {
        let default = default_pool("2607:f0d0:1002:51::0/96", IpVersion::V6).unwrap();
        let result = intersect_and_coalesce(
            &[pool("2607:f0d0:1002:51::0", "2607:f0d0:1002:51::ff")],
            &default,
        );
        assert_eq!(result, vec![pool("2607:f0d0:1002:51::a", "2607:f0d0:1002:51::ff")]);
    }

    #[test]
    fn test_full_ipv6_space() {
        let default = default_pool("::/0", IpVersion::V6).unwrap();
        let everything = pool("::", "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff");
        assert_eq!(intersect_and_coalesce(&[everything], &default), vec![default]);
    }

    #[test]
    fn test_intersection_is_idempotent() {
        let default = default_pool("192.168.199.0/24", IpVersion::V4).unwrap();
        let requested = [
            pool("192.168.199.0", "192.168.199.17"),
            pool("192.168.199.33", "192.168.199.64"),
            pool("192.168.199.60", "192.168.199.99"),
            pool("192.168.199.200", "192.168.199.255"),
        ];

        let once = intersect_and_coalesce(&requested, &default);
        let twice = intersect_and_coalesce(&once, &default);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_thousands_of_pools_merge_quickly() {
        let default = default_pool("::/0", IpVersion::V6).unwrap();
        // Odd-sized ranges with gaps, listed in reverse so the sort has work to do
        let requested: Vec<AllocationPool> = (0..20_000u128)
            .rev()
            .map(|i| {
                let base = (i << 64) | 0x1234;
                AllocationPool::new(
                    IpAddr::V6(Ipv6Addr::from(base)),
                    IpAddr::V6(Ipv6Addr::from(base + 0xfff_ffff_ffff)),
                )
                .unwrap()
            })
            .collect();

        let started = std::time::Instant::now();
        let result = intersect_and_coalesce(&requested, &default);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        assert_eq!(result.len(), requested.len());
        assert_eq!(result.first(), requested.last());
        assert_eq!(result.last(), requested.first());
    }

    #[test]
    fn test_overlapping_pools_collapse_to_one() {
        let default = default_pool("10.0.0.0/16", IpVersion::V4).unwrap();
        let requested: Vec<AllocationPool> = (0..5_000u32)
            .map(|i| {
                let start = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) + i);
                let end = Ipv4Addr::from(u32::from(start) + 9);
                AllocationPool::new(IpAddr::V4(start), IpAddr::V4(end)).unwrap()
            })
            .collect();

        assert_eq!(
            intersect_and_coalesce(&requested, &default),
            vec![pool("10.0.0.5", "10.0.19.144")]
        );
    }

    // =========================================================================
    // parse_pools
    // =========================================================================

    #[test]
    fn test_parse_pools() {
        let pools = parse_pools(
            &json!([{"start": "10.0.0.10", "end": "10.0.0.20"}]),
            IpVersion::V4,
        )
        .unwrap();
        assert_eq!(pools, vec![pool("10.0.0.10", "10.0.0.20")]);
    }

    #[test]
    fn test_parse_pools_reports_index_and_field() {
        let cases = [
            (json!({"start": "10.0.0.1"}), ValidationError::MalformedPools),
            (json!(["10.0.0.1"]), ValidationError::MalformedPool { index: 0 }),
            (
                json!([{"start": "10.0.0.1", "end": "10.0.0.2"}, {"start": "10.0.0.1"}]),
                ValidationError::MissingPoolField {
                    index: 1,
                    field: "end",
                },
            ),
            (
                json!([{"start": "10.0.0.x", "end": "10.0.0.2"}]),
                ValidationError::InvalidPoolAddress {
                    index: 0,
                    field: "start",
                    value: "10.0.0.x".into(),
                },
            ),
            (
                json!([{"start": "10.0.0.1", "end": 42}]),
                ValidationError::InvalidPoolAddress {
                    index: 0,
                    field: "end",
                    value: "42".into(),
                },
            ),
            (
                json!([{"start": "fd00::1", "end": "10.0.0.2"}]),
                ValidationError::PoolVersionMismatch {
                    index: 0,
                    field: "start",
                    value: "fd00::1".into(),
                    ip_version: 4,
                },
            ),
            (
                json!([{"start": "10.0.0.9", "end": "10.0.0.2"}]),
                ValidationError::InvertedPool { index: 0 },
            ),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_pools(&input, IpVersion::V4), Err(expected), "{input}");
        }
    }

    #[test]
    fn test_parse_pools_limits_count() {
        let entry = json!({"start": "10.0.0.10", "end": "10.0.0.20"});
        let at_limit = Value::Array(vec![entry.clone(); MAX_ALLOCATION_POOLS]);
        assert_eq!(parse_pools(&at_limit, IpVersion::V4).unwrap().len(), MAX_ALLOCATION_POOLS);

        let over = Value::Array(vec![entry; MAX_ALLOCATION_POOLS + 1]);
        assert_eq!(
            parse_pools(&over, IpVersion::V4),
            Err(ValidationError::TooManyPools {
                count: MAX_ALLOCATION_POOLS + 1,
                max: MAX_ALLOCATION_POOLS,
            })
        );
    }

    // =========================================================================
    // Subnet policy
    // =========================================================================

    #[test]
    fn test_apply_sets_default_when_pools_absent() {
        let result = apply_default_policy(
            subnet(json!({"cidr": "192.168.199.0/24", "ip_version": 4, "name": "web"})),
            EmptyPoolPolicy::Keep,
        )
        .unwrap();

        assert_eq!(
            result.get("allocation_pools"),
            Some(&json!([{"start": "192.168.199.5", "end": "192.168.199.254"}]))
        );
        assert_eq!(result.get("name"), Some(&json!("web")));
    }

    #[test]
    fn test_apply_clips_requested_pools() {
        let result = apply_default_policy(
            subnet(json!({
                "cidr": "192.168.199.0/24",
                "ip_version": 4,
                "allocation_pools": [{"start": "192.168.199.0", "end": "192.168.199.255"}]
            })),
            EmptyPoolPolicy::Keep,
        )
        .unwrap();

        assert_eq!(
            result.get("allocation_pools"),
            Some(&json!([{"start": "192.168.199.5", "end": "192.168.199.254"}]))
        );
    }

    #[test]
    fn test_apply_infers_missing_ip_version() {
        let result = apply_default_policy(subnet(json!({"cidr": "fd00::/64"})), EmptyPoolPolicy::Keep)
            .unwrap();
        assert_eq!(
            result.get("allocation_pools"),
            Some(&json!([{"start": "fd00::a", "end": "fd00::ffff:ffff:ffff:fffe"}]))
        );
    }

    #[test]
    fn test_apply_rejects_bad_subnets() {
        assert_eq!(
            apply_default_policy(subnet(json!({"ip_version": 4})), EmptyPoolPolicy::Keep),
            Err(ValidationError::MissingSubnetField("cidr"))
        );
        assert_eq!(
            apply_default_policy(
                subnet(json!({"cidr": "10.0.0.0/24", "ip_version": "4"})),
                EmptyPoolPolicy::Keep
            ),
            Err(ValidationError::UnsupportedIpVersion("\"4\"".into()))
        );
        assert_eq!(
            apply_default_policy(
                subnet(json!({"cidr": "10.0.0.0/24", "ip_version": 5})),
                EmptyPoolPolicy::Keep
            ),
            Err(ValidationError::UnsupportedIpVersion("5".into()))
        );
    }

    #[test]
    fn test_empty_intersection_policies() {
        let input = json!({
            "cidr": "10.0.0.0/24",
            "ip_version": 4,
            "allocation_pools": [{"start": "10.0.0.0", "end": "10.0.0.3"}]
        });

        let kept = apply_default_policy(subnet(input.clone()), EmptyPoolPolicy::Keep).unwrap();
        assert_eq!(kept.get("allocation_pools"), Some(&json!([])));

        let defaulted = apply_default_policy(subnet(input.clone()), EmptyPoolPolicy::Default).unwrap();
        assert_eq!(
            defaulted.get("allocation_pools"),
            Some(&json!([{"start": "10.0.0.5", "end": "10.0.0.254"}]))
        );

        assert_eq!(
            apply_default_policy(subnet(input), EmptyPoolPolicy::Reject),
            Err(ValidationError::NoPoolOverlap("10.0.0.0/24".into()))
        );
    }

    #[test]
    fn test_empty_pool_policy_from_str() {
        assert_eq!("keep".parse::<EmptyPoolPolicy>().unwrap(), EmptyPoolPolicy::Keep);
        assert_eq!("DEFAULT".parse::<EmptyPoolPolicy>().unwrap(), EmptyPoolPolicy::Default);
        assert_eq!(" reject ".parse::<EmptyPoolPolicy>().unwrap(), EmptyPoolPolicy::Reject);
        assert!(matches!(
            "drop".parse::<EmptyPoolPolicy>(),
            Err(ConfigurationError::UnknownEmptyPoolPolicy(_))
        ));
    }

    #[test]
    fn test_pool_deserialize_enforces_bounds() {
        let decoded: AllocationPool =
            serde_json::from_str(r#"{"start": "10.0.0.2", "end": "10.0.0.9"}"#).unwrap();
        assert_eq!(decoded, pool("10.0.0.2", "10.0.0.9"));

        let inverted = serde_json::from_str::<AllocationPool>(r#"{"start": "10.0.0.9", "end": "10.0.0.2"}"#);
        assert!(inverted.unwrap_err().to_string().contains("10.0.0.9-10.0.0.2"));

        let mixed = serde_json::from_str::<AllocationPool>(r#"{"start": "10.0.0.9", "end": "::1"}"#);
        assert!(mixed.is_err());
    }

    #[test]
    fn test_pool_serializes_as_strings() {
        let encoded = serde_json::to_value(pool("10.0.0.5", "10.0.0.254")).unwrap();
        assert_eq!(encoded, json!({"start": "10.0.0.5", "end": "10.0.0.254"}));
    }
}
