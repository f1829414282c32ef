//! Opaque fixed-width network address.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A 32-bit network address.
///
/// The value is kept in host order. Zero means "no address"; for a next hop
/// it means the destination is directly attached.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct Address(u32);

impl Address {
    pub const UNSPECIFIED: Self = Address(0);
    pub const BROADCAST: Self = Address(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Address(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Returns true for the all-zero address.
    pub const fn is_unspecified(&self) -> bool {
        self.0 == 0
    }

    /// Returns true for 0.0.0.0/8.
    pub const fn is_zeronet(&self) -> bool {
        self.0 & 0xff00_0000 == 0
    }

    /// Returns true for the limited broadcast address.
    pub const fn is_limited_broadcast(&self) -> bool {
        self.0 == u32::MAX
    }

    /// Returns true for 224.0.0.0/4.
    pub const fn is_multicast(&self) -> bool {
        self.0 & 0xf000_0000 == 0xe000_0000
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ipv4Addr::from(self.0).fmt(f)
    }
}

impl FromStr for Address {
    type Err = ParseError;

    /// Accepts dotted-quad (`192.168.0.1`) or hex (`0xc0a80001`) notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u32::from_str_radix(hex, 16)
                .map(Address)
                .map_err(|_| ParseError::InvalidAddress(s.to_string()));
        }
        s.parse::<Ipv4Addr>()
            .map(|addr| Address(u32::from(addr)))
            .map_err(|_| ParseError::InvalidAddress(s.to_string()))
    }
}

impl From<u32> for Address {
    fn from(raw: u32) -> Self {
        Address(raw)
    }
}

impl From<Address> for u32 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl From<Ipv4Addr> for Address {
    fn from(addr: Ipv4Addr) -> Self {
        Address(u32::from(addr))
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Classification of an address as seen by the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// Ordinary remote unicast address.
    Unicast,
    /// Address configured on a local device.
    Local,
    /// Broadcast address (limited or zero-net).
    Broadcast,
    /// Anycast address.
    Anycast,
    /// Multicast group address.
    Multicast,
}

impl AddressType {
    /// Returns true if the address may be used as a unicast gateway.
    pub const fn is_unicast(&self) -> bool {
        matches!(self, AddressType::Unicast)
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressType::Unicast => "unicast",
            AddressType::Local => "local",
            AddressType::Broadcast => "broadcast",
            AddressType::Anycast => "anycast",
            AddressType::Multicast => "multicast",
        };
        write!(f, "{}", s)
    }
}
