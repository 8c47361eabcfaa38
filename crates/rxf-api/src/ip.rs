// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use alloc::string::ToString;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;
pub const IPPROTO_SCTP: u8 = 132;

/// An IPv4 address, stored in network order.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 4] };
    pub const ALL_ONES: Self = Self { inner: [0xFF; 4] };

    pub const fn from_const(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }

    /// The address as a host-order integer, the form written to a
    /// 32-bit address register.
    pub fn to_be_u32(&self) -> u32 {
        u32::from_be_bytes(self.inner)
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl From<core::net::Ipv4Addr> for Ipv4Addr {
    fn from(ip: core::net::Ipv4Addr) -> Self {
        Self { inner: ip.octets() }
    }
}

impl From<Ipv4Addr> for core::net::Ipv4Addr {
    fn from(ip: Ipv4Addr) -> Self {
        Self::from(ip.inner)
    }
}

impl FromStr for Ipv4Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        val.parse::<core::net::Ipv4Addr>()
            .map(Self::from)
            .map_err(|e| format!("malformed ip {val}: {e}"))
    }
}

impl Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.inner[0], self.inner[1], self.inner[2], self.inner[3],
        )
    }
}

impl Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv4Addr {{ inner: {self} }}")
    }
}

/// An IPv6 address, stored in network order.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Ipv6Addr {
    inner: [u8; 16],
}

impl Ipv6Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 16] };
    pub const ALL_ONES: Self = Self { inner: [0xFF; 16] };

    pub const fn from_const(bytes: [u8; 16]) -> Self {
        Self { inner: bytes }
    }

    pub fn bytes(&self) -> [u8; 16] {
        self.inner
    }

    /// The address split into four host-order words, most
    /// significant word first.
    pub fn words(&self) -> [u32; 4] {
        let b = &self.inner;
        [
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            u32::from_be_bytes([b[12], b[13], b[14], b[15]]),
        ]
    }
}

impl From<[u8; 16]> for Ipv6Addr {
    fn from(bytes: [u8; 16]) -> Self {
        Self { inner: bytes }
    }
}

impl From<core::net::Ipv6Addr> for Ipv6Addr {
    fn from(ip: core::net::Ipv6Addr) -> Self {
        Self { inner: ip.octets() }
    }
}

impl From<Ipv6Addr> for core::net::Ipv6Addr {
    fn from(ip: Ipv6Addr) -> Self {
        Self::from(ip.inner)
    }
}

impl FromStr for Ipv6Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        val.parse::<core::net::Ipv6Addr>()
            .map(Self::from)
            .map_err(|e| e.to_string())
    }
}

impl Display for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", core::net::Ipv6Addr::from(self.inner))
    }
}

impl Debug for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv6Addr {{ inner: {self} }}")
    }
}

/// A MAC address.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const ZERO: Self = Self { inner: [0; 6] };
    pub const BROADCAST: Self = Self { inner: [0xFF; 6] };

    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.inner[0],
            self.inner[1],
            self.inner[2],
            self.inner[3],
            self.inner[4],
            self.inner[5]
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ipv4_parse_and_words() {
        let ip: Ipv4Addr = "192.168.2.10".parse().unwrap();
        assert_eq!(ip.bytes(), [192, 168, 2, 10]);
        assert_eq!(ip.to_be_u32(), 0xC0A8_020A);
        assert!("192.168.2".parse::<Ipv4Addr>().is_err());
    }

    #[test]
    fn ipv6_words_are_most_significant_first() {
        let ip: Ipv6Addr = "fd00::1".parse().unwrap();
        assert_eq!(ip.words(), [0xFD00_0000, 0, 0, 1]);
        assert_eq!(ip.to_string(), "fd00::1");
    }
}
