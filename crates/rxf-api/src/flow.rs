// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow match specifications.
//!
//! A rule names one flow type and supplies, for each field that flow
//! type carries, a value and a mask. The hardware matches a field
//! either exactly or not at all, so apart from the VLAN TCI every
//! mask must be all zeros (field absent) or all ones (field
//! present).

use super::ip::Ipv4Addr;
use super::ip::Ipv6Addr;
use super::ip::MacAddr;
use super::ring::RingCookie;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The `ip_ver` value an IPv4 user flow must carry.
pub const IP_USER_FLOW_V4: u8 = 1;

/// A field type that can be masked.
pub trait MaskField: Copy + Eq {
    /// The mask selecting no bits.
    const ZERO: Self;
    /// The mask selecting every bit.
    const ONES: Self;
}

impl MaskField for u8 {
    const ZERO: Self = 0;
    const ONES: Self = u8::MAX;
}

impl MaskField for u16 {
    const ZERO: Self = 0;
    const ONES: Self = u16::MAX;
}

impl MaskField for u32 {
    const ZERO: Self = 0;
    const ONES: Self = u32::MAX;
}

impl MaskField for [u32; 2] {
    const ZERO: Self = [0; 2];
    const ONES: Self = [u32::MAX; 2];
}

impl MaskField for Ipv4Addr {
    const ZERO: Self = Ipv4Addr::ANY_ADDR;
    const ONES: Self = Ipv4Addr::ALL_ONES;
}

impl MaskField for Ipv6Addr {
    const ZERO: Self = Ipv6Addr::ANY_ADDR;
    const ONES: Self = Ipv6Addr::ALL_ONES;
}

impl MaskField for MacAddr {
    const ZERO: Self = MacAddr::ZERO;
    const ONES: Self = MacAddr::BROADCAST;
}

/// Returned when a mask selects some, but not all, bits of a field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartialMask;

/// A field value along with the mask of bits to match.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Masked<T> {
    pub value: T,
    pub mask: T,
}

impl<T: MaskField> Masked<T> {
    /// Match `value` exactly.
    pub fn exact(value: T) -> Self {
        Self { value, mask: T::ONES }
    }

    /// Match any value.
    pub fn wildcard() -> Self {
        Self { value: T::ZERO, mask: T::ZERO }
    }

    pub fn is_wildcard(&self) -> bool {
        self.mask == T::ZERO
    }

    /// Interpret the mask as exact-or-ignore.
    ///
    /// Returns `Some(value)` for an all-ones mask, `None` for an
    /// all-zeros mask, and [`PartialMask`] otherwise.
    pub fn binary(&self) -> Result<Option<T>, PartialMask> {
        if self.mask == T::ZERO {
            Ok(None)
        } else if self.mask == T::ONES {
            Ok(Some(self.value))
        } else {
            Err(PartialMask)
        }
    }

    /// Build from an optional exact value.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::exact(v),
            None => Self::wildcard(),
        }
    }
}

impl<T: MaskField> Default for Masked<T> {
    fn default() -> Self {
        Self::wildcard()
    }
}

/// Ethernet header match fields.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EtherSpec {
    pub src: Masked<MacAddr>,
    pub dst: Masked<MacAddr>,
    pub ether_type: Masked<u16>,
}

/// Extended match fields: the 802.1Q tag and opaque user data.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowExt {
    pub vlan_etype: Masked<u16>,
    pub vlan_tci: Masked<u16>,
    pub data: Masked<[u32; 2]>,
}

/// TCP/UDP/SCTP over IPv4.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv4L4Spec {
    pub src: Masked<Ipv4Addr>,
    pub dst: Masked<Ipv4Addr>,
    pub src_port: Masked<u16>,
    pub dst_port: Masked<u16>,
    pub tos: Masked<u8>,
}

/// Raw IPv4, with an optional protocol.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv4UserSpec {
    pub src: Masked<Ipv4Addr>,
    pub dst: Masked<Ipv4Addr>,
    pub l4_4_bytes: Masked<u32>,
    pub tos: Masked<u8>,
    pub proto: Masked<u8>,
    pub ip_ver: u8,
}

impl Default for Ipv4UserSpec {
    fn default() -> Self {
        Self {
            src: Masked::wildcard(),
            dst: Masked::wildcard(),
            l4_4_bytes: Masked::wildcard(),
            tos: Masked::wildcard(),
            proto: Masked::wildcard(),
            ip_ver: IP_USER_FLOW_V4,
        }
    }
}

/// TCP/UDP/SCTP over IPv6.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv6L4Spec {
    pub src: Masked<Ipv6Addr>,
    pub dst: Masked<Ipv6Addr>,
    pub src_port: Masked<u16>,
    pub dst_port: Masked<u16>,
    pub tclass: Masked<u8>,
}

/// Raw IPv6, with an optional next-header protocol.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv6UserSpec {
    pub src: Masked<Ipv6Addr>,
    pub dst: Masked<Ipv6Addr>,
    pub l4_4_bytes: Masked<u32>,
    pub tclass: Masked<u8>,
    pub l4_proto: Masked<u8>,
}

/// A flow type together with its match fields.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FlowSpec {
    Ether(EtherSpec),
    TcpV4(Ipv4L4Spec),
    UdpV4(Ipv4L4Spec),
    SctpV4(Ipv4L4Spec),
    Ip4User(Ipv4UserSpec),
    TcpV6(Ipv6L4Spec),
    UdpV6(Ipv6L4Spec),
    SctpV6(Ipv6L4Spec),
    Ip6User(Ipv6UserSpec),
}

impl FlowSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ether(_) => "ether",
            Self::TcpV4(_) => "tcp4",
            Self::UdpV4(_) => "udp4",
            Self::SctpV4(_) => "sctp4",
            Self::Ip4User(_) => "ip4",
            Self::TcpV6(_) => "tcp6",
            Self::UdpV6(_) => "udp6",
            Self::SctpV6(_) => "sctp6",
            Self::Ip6User(_) => "ip6",
        }
    }

    /// Is this an IPv4/IPv6 flow type handled by the n-tuple filters?
    pub fn is_ip(&self) -> bool {
        !matches!(self, Self::Ether(_))
    }
}

impl Default for FlowSpec {
    fn default() -> Self {
        Self::Ether(EtherSpec::default())
    }
}

impl Display for FlowSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where a rule lives in the flat rule-location space.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RuleLocation {
    /// An explicit location.
    At(u32),
    /// Let the device pick the first category that accepts the rule,
    /// and a slot within it.
    Any,
}

impl Display for RuleLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::At(loc) => write!(f, "{loc}"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// A classification rule: where it lives, what it matches, and where
/// matching packets go.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowRule {
    pub location: RuleLocation,
    pub flow: FlowSpec,
    pub ext: Option<FlowExt>,
    pub ring_cookie: RingCookie,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_masks() {
        assert_eq!(Masked::exact(80u16).binary(), Ok(Some(80)));
        assert_eq!(Masked::<u16>::wildcard().binary(), Ok(None));

        let partial = Masked {
            value: Ipv4Addr::from([10, 0, 0, 1]),
            mask: Ipv4Addr::from([0x0F, 0x0F, 0x0F, 0x0F]),
        };
        assert_eq!(partial.binary(), Err(PartialMask));

        let half = Masked { value: 0u16, mask: 0xFF00 };
        assert_eq!(half.binary(), Err(PartialMask));
    }
}
