//! CIDR arithmetic.
//!
//! Parses dotted-quad/prefix notation into a comparable integer range and
//! provides the range math the overlap validator and segment geometry are
//! built on. Pure functions, no I/O.

use std::cmp::Ordering;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{IpamError, Result};

/// Largest valid prefix length for IPv4.
pub const MAX_PREFIX: u8 = 32;

/// An IPv4 network range in canonical form.
///
/// `start` always has the host bits cleared: parsing normalizes input such as
/// `10.0.0.5/24` to `10.0.0.0/24`, matching standard subnetting semantics.
/// The full prefix range [0,32] is accepted; size arithmetic is 64-bit so a
/// `/0` range (2^32 addresses) is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrRange {
    start: u32,
    prefix: u8,
}

impl CidrRange {
    /// Build a range from an address and prefix, clearing any host bits.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > MAX_PREFIX {
            return Err(IpamError::InvalidCidr {
                input: format!("{}/{}", addr, prefix),
                reason: format!("prefix must be between 0 and {}", MAX_PREFIX),
            });
        }
        Ok(CidrRange {
            start: u32::from(addr) & mask(prefix),
            prefix,
        })
    }

    /// Parse `a.b.c.d/p` notation. Fails with `InvalidCidr` for anything that
    /// is not a dotted quad, an octet outside [0,255], or a prefix outside
    /// [0,32].
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| IpamError::InvalidCidr {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let (addr_part, prefix_part) = trimmed
            .split_once('/')
            .ok_or_else(|| invalid("expected address/prefix notation"))?;

        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| invalid("malformed IPv4 address"))?;
        let prefix: u8 = prefix_part
            .parse()
            .map_err(|_| invalid("prefix is not a number"))?;
        if prefix > MAX_PREFIX {
            return Err(invalid("prefix must be between 0 and 32"));
        }

        Ok(CidrRange {
            start: u32::from(addr) & mask(prefix),
            prefix,
        })
    }

    /// First address of the range as an integer.
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses covered: `2^(32 - prefix)`.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// One past the last address, as a 64-bit integer so `/0` does not wrap.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + self.size()
    }

    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start)
    }

    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from((self.end() - 1) as u32)
    }

    /// Two ranges overlap iff `max(startA, startB) < min(endA, endB)`.
    pub fn overlaps(&self, other: &CidrRange) -> bool {
        u64::from(self.start.max(other.start)) < self.end().min(other.end())
    }

    /// True when `other` lies entirely within this range.
    pub fn contains(&self, other: &CidrRange) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Sort order: by start ascending, ties broken by prefix ascending.
impl Ord for CidrRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(self.prefix.cmp(&other.prefix))
    }
}

impl PartialOrd for CidrRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network_address(), self.prefix)
    }
}

impl FromStr for CidrRange {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self> {
        CidrRange::parse(s)
    }
}

// CIDR values persist as canonical text in every record set and snapshot.
impl Serialize for CidrRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CidrRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        CidrRange::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let net = CidrRange::parse("192.168.1.0/24").unwrap();
        assert_eq!(net.start(), 0xC0A80100);
        assert_eq!(net.prefix(), 24);
        assert_eq!(net.size(), 256);
        assert_eq!(net.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_parse_normalizes_host_bits() {
        let net = CidrRange::parse("10.0.0.5/24").unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/24");

        let net = CidrRange::parse("192.168.1.130/25").unwrap();
        assert_eq!(net.to_string(), "192.168.1.128/25");
    }

    #[test]
    fn test_parse_full_prefix_range() {
        let all = CidrRange::parse("0.0.0.0/0").unwrap();
        assert_eq!(all.size(), 1u64 << 32);
        assert_eq!(all.end(), 1u64 << 32);

        let host = CidrRange::parse("10.1.2.3/32").unwrap();
        assert_eq!(host.size(), 1);
        assert_eq!(host.to_string(), "10.1.2.3/32");
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        for bad in [
            "",
            "10.0.0.0",
            "10.0.0.0/",
            "/24",
            "10.0.0/24",
            "10.0.0.256/24",
            "10.0.0.0/33",
            "10.0.0.0/-1",
            "10.0.0.0/abc",
            "not-a-cidr",
            "10.0.0.0/24/8",
        ] {
            let err = CidrRange::parse(bad).unwrap_err();
            assert!(
                matches!(err, IpamError::InvalidCidr { .. }),
                "expected InvalidCidr for {:?}, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_overlap() {
        let a = CidrRange::parse("192.168.1.0/24").unwrap();
        let b = CidrRange::parse("192.168.1.128/25").unwrap();
        let c = CidrRange::parse("192.168.2.0/24").unwrap();

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&b));
        // A range always overlaps itself
        assert!(a.overlaps(&a));
    }

    #[test]
    fn test_contains() {
        let outer = CidrRange::parse("10.0.0.0/8").unwrap();
        let inner = CidrRange::parse("10.5.0.0/16").unwrap();
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn test_ordering() {
        let mut nets = vec![
            CidrRange::parse("10.0.1.0/24").unwrap(),
            CidrRange::parse("10.0.0.0/16").unwrap(),
            CidrRange::parse("10.0.0.0/24").unwrap(),
        ];
        nets.sort();
        let text: Vec<String> = nets.iter().map(|n| n.to_string()).collect();
        // start ascending, prefix ascending on ties
        assert_eq!(text, vec!["10.0.0.0/16", "10.0.0.0/24", "10.0.1.0/24"]);
    }

    #[test]
    fn test_serde_round_trip_as_text() {
        let net = CidrRange::parse("172.16.0.0/12").unwrap();
        let json = serde_json::to_string(&net).unwrap();
        assert_eq!(json, "\"172.16.0.0/12\"");
        let back: CidrRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, net);
    }

    #[test]
    fn test_broadcast_address() {
        let net = CidrRange::parse("192.168.1.0/24").unwrap();
        assert_eq!(net.broadcast_address(), Ipv4Addr::new(192, 168, 1, 255));
    }
}
