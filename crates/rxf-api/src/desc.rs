// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A flat, text-friendly description of a rule.
//!
//! [`FlowRule`] spells out a mask for every field of every flow type.
//! Admin tools and replay files only ever set a handful of exact
//! fields, so they describe rules with a [`RuleDesc`] instead.

use super::flow::EtherSpec;
use super::flow::FlowExt;
use super::flow::FlowRule;
use super::flow::FlowSpec;
use super::flow::Ipv4L4Spec;
use super::flow::Ipv4UserSpec;
use super::flow::Ipv6L4Spec;
use super::flow::Ipv6UserSpec;
use super::flow::MaskField;
use super::flow::Masked;
use super::flow::RuleLocation;
use super::ip::Ipv4Addr;
use super::ip::Ipv6Addr;
use alloc::string::String;
use alloc::string::ToString;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The bits of the 802.1Q TCI holding the VLAN ID.
pub const VLAN_VID_MASK: u16 = 0x0fff;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RuleDesc {
    /// The rule location, or `None` to let the device choose.
    pub loc: Option<u32>,
    /// One of the [`FlowSpec::name`] values.
    pub flow: String,
    pub src: Option<String>,
    pub dst: Option<String>,
    pub sport: Option<u16>,
    pub dport: Option<u16>,
    pub etype: Option<u16>,
    pub proto: Option<u8>,
    /// Match the VLAN ID of the 802.1Q tag.
    pub vid: Option<u16>,
    /// A ring number, `any`, or `drop`.
    pub ring: String,
}

impl Default for RuleDesc {
    fn default() -> Self {
        Self {
            loc: None,
            flow: "ether".to_string(),
            src: None,
            dst: None,
            sport: None,
            dport: None,
            etype: None,
            proto: None,
            vid: None,
            ring: "any".to_string(),
        }
    }
}

fn addr<T: MaskField + FromStr<Err = String>>(
    val: &Option<String>,
) -> Result<Masked<T>, String> {
    match val {
        Some(s) => s.parse().map(Masked::exact),
        None => Ok(Masked::wildcard()),
    }
}

impl RuleDesc {
    fn no_ports(&self) -> Result<(), String> {
        if self.sport.is_some() || self.dport.is_some() {
            return Err(format!("{} rules have no ports", self.flow));
        }

        Ok(())
    }

    fn no_proto(&self) -> Result<(), String> {
        if self.proto.is_some() {
            return Err(format!("{} rules imply their protocol", self.flow));
        }

        Ok(())
    }

    fn v4_l4(&self) -> Result<Ipv4L4Spec, String> {
        self.no_proto()?;
        Ok(Ipv4L4Spec {
            src: addr::<Ipv4Addr>(&self.src)?,
            dst: addr::<Ipv4Addr>(&self.dst)?,
            src_port: Masked::from_option(self.sport),
            dst_port: Masked::from_option(self.dport),
            ..Default::default()
        })
    }

    fn v6_l4(&self) -> Result<Ipv6L4Spec, String> {
        self.no_proto()?;
        Ok(Ipv6L4Spec {
            src: addr::<Ipv6Addr>(&self.src)?,
            dst: addr::<Ipv6Addr>(&self.dst)?,
            src_port: Masked::from_option(self.sport),
            dst_port: Masked::from_option(self.dport),
            ..Default::default()
        })
    }

    fn flow_spec(&self) -> Result<FlowSpec, String> {
        if self.etype.is_some() && self.flow != "ether" {
            return Err(format!("{} rules can't match an EtherType", self.flow));
        }

        let spec = match self.flow.as_str() {
            "ether" => {
                self.no_ports()?;
                self.no_proto()?;
                if self.src.is_some() || self.dst.is_some() {
                    return Err("ether rules can't match addresses".to_string());
                }

                FlowSpec::Ether(EtherSpec {
                    ether_type: Masked::from_option(self.etype),
                    ..Default::default()
                })
            }

            "tcp4" => FlowSpec::TcpV4(self.v4_l4()?),
            "udp4" => FlowSpec::UdpV4(self.v4_l4()?),
            "sctp4" => FlowSpec::SctpV4(self.v4_l4()?),
            "tcp6" => FlowSpec::TcpV6(self.v6_l4()?),
            "udp6" => FlowSpec::UdpV6(self.v6_l4()?),
            "sctp6" => FlowSpec::SctpV6(self.v6_l4()?),

            "ip4" => {
                self.no_ports()?;
                FlowSpec::Ip4User(Ipv4UserSpec {
                    src: addr::<Ipv4Addr>(&self.src)?,
                    dst: addr::<Ipv4Addr>(&self.dst)?,
                    proto: Masked::from_option(self.proto),
                    ..Default::default()
                })
            }

            "ip6" => {
                self.no_ports()?;
                FlowSpec::Ip6User(Ipv6UserSpec {
                    src: addr::<Ipv6Addr>(&self.src)?,
                    dst: addr::<Ipv6Addr>(&self.dst)?,
                    l4_proto: Masked::from_option(self.proto),
                    ..Default::default()
                })
            }

            other => return Err(format!("unknown flow type: {other}")),
        };

        Ok(spec)
    }

    /// Build the [`FlowRule`] this describes.
    pub fn to_rule(&self) -> Result<FlowRule, String> {
        let location = match self.loc {
            Some(loc) => RuleLocation::At(loc),
            None => RuleLocation::Any,
        };

        let ext = match self.vid {
            Some(vid) if vid > VLAN_VID_MASK => {
                return Err(format!("VLAN ID out of range: {vid}"));
            }

            Some(vid) => Some(FlowExt {
                vlan_tci: Masked { value: vid, mask: VLAN_VID_MASK },
                ..Default::default()
            }),

            None => None,
        };

        Ok(FlowRule {
            location,
            flow: self.flow_spec()?,
            ext,
            ring_cookie: self.ring.parse()?,
        })
    }
}

impl TryFrom<&RuleDesc> for FlowRule {
    type Error = String;

    fn try_from(desc: &RuleDesc) -> Result<Self, Self::Error> {
        desc.to_rule()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ring::RingCookie;

    #[test]
    fn tcp4_desc() {
        let desc = RuleDesc {
            loc: Some(32),
            flow: "tcp4".into(),
            dst: Some("10.0.0.1".into()),
            dport: Some(80),
            ring: "3".into(),
            ..Default::default()
        };

        let rule = desc.to_rule().unwrap();
        assert_eq!(rule.location, RuleLocation::At(32));
        assert_eq!(rule.ring_cookie, RingCookie::queue(3));
        match rule.flow {
            FlowSpec::TcpV4(s) => {
                assert_eq!(s.dst_port, Masked::exact(80));
                assert!(s.src.is_wildcard());
            }

            other => panic!("unexpected flow {other:?}"),
        }
    }

    #[test]
    fn vlan_desc() {
        let desc = RuleDesc { vid: Some(100), ..Default::default() };
        let rule = desc.to_rule().unwrap();
        assert_eq!(rule.location, RuleLocation::Any);
        assert_eq!(rule.ring_cookie, RingCookie::any());
        assert_eq!(
            rule.ext.map(|e| e.vlan_tci),
            Some(Masked { value: 100, mask: VLAN_VID_MASK })
        );
    }

    #[test]
    fn bad_descs() {
        let bad = [
            RuleDesc { flow: "ether".into(), dport: Some(80), ..Default::default() },
            RuleDesc { flow: "tcp4".into(), proto: Some(6), ..Default::default() },
            RuleDesc { flow: "tcp4".into(), etype: Some(0x800), ..Default::default() },
            RuleDesc { flow: "tcp4".into(), dst: Some("fd00::1".into()), ..Default::default() },
            RuleDesc { flow: "gre".into(), ..Default::default() },
            RuleDesc { vid: Some(4096), ..Default::default() },
            RuleDesc { ring: "nowhere".into(), ..Default::default() },
        ];

        for desc in bad {
            assert!(desc.to_rule().is_err(), "accepted {desc:?}");
        }
    }
}
