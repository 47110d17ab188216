//! IPv4 address ranges used for the reserved-range table.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use cpc_core::{CpcError, Result};
use serde::{Deserialize, Serialize};

/// Inclusive IPv4 range, written `START-END` (e.g. `10.10.10.2-10.10.10.99`).
/// A single address is accepted as a one-address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl IpRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        if u32::from(start) > u32::from(end) {
            return Err(CpcError::config(format!(
                "Invalid address range: start ({start}) is after end ({end})"
            )));
        }
        Ok(IpRange { start, end })
    }

    pub fn parse(range_str: &str) -> Result<Self> {
        let range_str = range_str.trim();
        let (start, end) = match range_str.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (range_str, range_str),
        };

        let parse_addr = |s: &str| {
            s.parse::<Ipv4Addr>().map_err(|_| {
                CpcError::config_with_hint(
                    format!("Invalid address in range '{range_str}': {s}"),
                    "Expected format: START-END (e.g., 10.10.10.2-10.10.10.99)",
                )
            })
        };

        IpRange::new(parse_addr(start)?, parse_addr(end)?)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let addr = u32::from(addr);
        u32::from(self.start) <= addr && addr <= u32::from(self.end)
    }

    pub fn overlaps_with(&self, other: &IpRange) -> bool {
        u32::from(self.start) <= u32::from(other.end)
            && u32::from(other.start) <= u32::from(self.end)
    }

    /// Number of addresses in the range. The whole IPv4 space does not fit a `u32`.
    pub fn size(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }
}

impl FromStr for IpRange {
    type Err = CpcError;

    fn from_str(s: &str) -> Result<Self> {
        IpRange::parse(s)
    }
}

impl TryFrom<String> for IpRange {
    type Error = CpcError;

    fn try_from(value: String) -> Result<Self> {
        IpRange::parse(&value)
    }
}

impl From<IpRange> for String {
    fn from(range: IpRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_range() {
        let range = IpRange::parse("10.10.10.2-10.10.10.99").unwrap();
        assert_eq!(range.start, Ipv4Addr::new(10, 10, 10, 2));
        assert_eq!(range.end, Ipv4Addr::new(10, 10, 10, 99));
        assert_eq!(range.size(), 98);
    }

    #[test]
    fn test_parse_single_address() {
        let range = IpRange::parse("10.10.10.1").unwrap();
        assert_eq!(range.size(), 1);
        assert_eq!(range.to_string(), "10.10.10.1");
    }

    #[test]
    fn test_size_of_whole_space() {
        let all = IpRange::parse("0.0.0.0-255.255.255.255").unwrap();
        assert_eq!(all.size(), 1 << 32);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(IpRange::parse("10.10.10").is_err());
        assert!(IpRange::parse("10.10.10.9-10.10.10.1").is_err());
        assert!(IpRange::parse("a-b").is_err());
    }

    #[test]
    fn test_contains_and_overlap() {
        let dhcp = IpRange::parse("10.10.10.2-10.10.10.99").unwrap();
        assert!(dhcp.contains(Ipv4Addr::new(10, 10, 10, 2)));
        assert!(dhcp.contains(Ipv4Addr::new(10, 10, 10, 99)));
        assert!(!dhcp.contains(Ipv4Addr::new(10, 10, 10, 100)));

        let statics = IpRange::parse("10.10.10.90-10.10.10.109").unwrap();
        let blocks = IpRange::parse("10.10.10.110-10.10.10.200").unwrap();
        assert!(dhcp.overlaps_with(&statics));
        assert!(statics.overlaps_with(&dhcp));
        assert!(!dhcp.overlaps_with(&blocks));
    }
}
