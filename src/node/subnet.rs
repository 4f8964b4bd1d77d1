//! Subnet ranges owned by nodes.
//!
//! Accepted forms, each with an optional `#weight` suffix:
//! ```text
//! 10.1.0.0/16        IPv4 network
//! 10.1.2.3           IPv4 host (/32)
//! fd00:1::/48        IPv6 network
//! 00:16:3e:0a:0b:0c  MAC address
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Weight given to subnets that do not carry an explicit `#weight`.
pub const DEFAULT_WEIGHT: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubnetError {
    #[error("malformed subnet `{0}`")]
    Malformed(String),
    #[error("prefix length {prefix} out of range in `{input}`")]
    PrefixOutOfRange { input: String, prefix: u8 },
    #[error("network address and prefix length do not match in `{0}`")]
    HostBitsSet(String),
    #[error("invalid weight in `{0}`")]
    Weight(String),
}

/// The address range a subnet covers. Two subnets describe the same range
/// exactly when their `SubnetRange` values are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubnetRange {
    Mac([u8; 6]),
    Ipv4 { address: Ipv4Addr, prefix: u8 },
    Ipv6 { address: Ipv6Addr, prefix: u8 },
}

/// When a subnet stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Declared in configuration; authoritative.
    Never,
    /// Learned at runtime; swept after this instant.
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub range: SubnetRange,
    pub weight: u32,
    pub expires: Expiry,
}

impl Subnet {
    /// A non-expiring subnet with the default weight.
    pub fn new(range: SubnetRange) -> Self {
        Self { range, weight: DEFAULT_WEIGHT, expires: Expiry::Never }
    }

    pub fn is_authoritative(&self) -> bool {
        self.expires == Expiry::Never
    }
}

impl FromStr for Subnet {
    type Err = SubnetError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (body, weight) = match input.split_once('#') {
            Some((body, weight)) => (
                body,
                weight
                    .parse::<u32>()
                    .map_err(|_| SubnetError::Weight(input.to_string()))?,
            ),
            None => (input, DEFAULT_WEIGHT),
        };

        let range = match parse_mac(body) {
            Some(mac) => SubnetRange::Mac(mac),
            None => parse_ip_range(body, input)?,
        };

        if !range.host_bits_clear() {
            return Err(SubnetError::HostBitsSet(input.to_string()));
        }

        Ok(Subnet { range, weight, expires: Expiry::Never })
    }
}

fn parse_mac(body: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = body.split(':');
    for byte in mac.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

fn parse_ip_range(body: &str, input: &str) -> Result<SubnetRange, SubnetError> {
    let (address, prefix) = match body.split_once('/') {
        Some((address, prefix)) => (
            address,
            Some(
                prefix
                    .parse::<u8>()
                    .map_err(|_| SubnetError::Malformed(input.to_string()))?,
            ),
        ),
        None => (body, None),
    };

    let address: IpAddr = address
        .parse()
        .map_err(|_| SubnetError::Malformed(input.to_string()))?;

    let (max, range) = match address {
        IpAddr::V4(address) => {
            let prefix = prefix.unwrap_or(32);
            (32, SubnetRange::Ipv4 { address, prefix })
        }
        IpAddr::V6(address) => {
            let prefix = prefix.unwrap_or(128);
            (128, SubnetRange::Ipv6 { address, prefix })
        }
    };

    match range {
        SubnetRange::Ipv4 { prefix, .. } | SubnetRange::Ipv6 { prefix, .. } if prefix > max => {
            Err(SubnetError::PrefixOutOfRange { input: input.to_string(), prefix })
        }
        _ => Ok(range),
    }
}

impl SubnetRange {
    /// `false` when the address has bits set beyond its prefix length.
    fn host_bits_clear(&self) -> bool {
        match *self {
            SubnetRange::Mac(_) => true,
            SubnetRange::Ipv4 { address, prefix } => {
                let host_mask = u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
                u32::from(address) & host_mask == 0
            }
            SubnetRange::Ipv6 { address, prefix } => {
                let host_mask = u128::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
                u128::from(address) & host_mask == 0
            }
        }
    }
}

impl fmt::Display for SubnetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetRange::Mac(m) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            ),
            SubnetRange::Ipv4 { address, prefix } => write!(f, "{address}/{prefix}"),
            SubnetRange::Ipv6 { address, prefix } => write!(f, "{address}/{prefix}"),
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.range)?;
        if self.weight != DEFAULT_WEIGHT {
            write!(f, "#{}", self.weight)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_network() {
        let s: Subnet = "10.1.0.0/16".parse().unwrap();
        assert_eq!(
            s.range,
            SubnetRange::Ipv4 { address: Ipv4Addr::new(10, 1, 0, 0), prefix: 16 }
        );
        assert_eq!(s.weight, DEFAULT_WEIGHT);
        assert!(s.is_authoritative());
    }

    #[test]
    fn bare_ipv4_address_is_a_host_route() {
        let s: Subnet = "192.168.7.9".parse().unwrap();
        assert_eq!(s.to_string(), "192.168.7.9/32");
    }

    #[test]
    fn parses_ipv6_and_weight() {
        let s: Subnet = "fd00:1::/48#3".parse().unwrap();
        assert!(matches!(s.range, SubnetRange::Ipv6 { prefix: 48, .. }));
        assert_eq!(s.weight, 3);
        assert_eq!(s.to_string(), "fd00:1::/48#3");
    }

    #[test]
    fn parses_mac_address() {
        let s: Subnet = "00:16:3e:0a:0b:0c".parse().unwrap();
        assert_eq!(s.range, SubnetRange::Mac([0x00, 0x16, 0x3e, 0x0a, 0x0b, 0x0c]));
        assert_eq!(s.to_string(), "00:16:3e:0a:0b:0c");
    }

    #[test]
    fn rejects_host_bits_beyond_prefix() {
        let err = "10.1.2.3/16".parse::<Subnet>().unwrap_err();
        assert!(matches!(err, SubnetError::HostBitsSet(_)));
    }

    #[test]
    fn rejects_oversized_prefix() {
        assert!(matches!(
            "10.0.0.0/33".parse::<Subnet>(),
            Err(SubnetError::PrefixOutOfRange { prefix: 33, .. })
        ));
        assert!("fd00::/129".parse::<Subnet>().is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-a-subnet".parse::<Subnet>().is_err());
        assert!("10.0.0.0/x".parse::<Subnet>().is_err());
        assert!("10.0.0.0/8#heavy".parse::<Subnet>().is_err());
        assert!("00:16:3e:0a:0b".parse::<Subnet>().is_err());
    }

    #[test]
    fn zero_prefix_covers_everything() {
        let s: Subnet = "0.0.0.0/0".parse().unwrap();
        assert_eq!(s.to_string(), "0.0.0.0/0");
        let s: Subnet = "::/0".parse().unwrap();
        assert_eq!(s.to_string(), "::/0");
    }
}
