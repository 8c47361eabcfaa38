// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! N-tuple filters: IP version, protocol, addresses and ports.
//!
//! Each field is either matched exactly or ignored. On the legacy
//! generation an IPv6 rule needs the address registers of four
//! consecutive slots, so it must start on a multiple of four and the
//! three slots after it are unusable while it lives.

use super::location::CategoryDesc;
use super::location::NTUPLE_RXQ;
use super::location::SlotIdx;
use super::regs::NTC_L4_MASK;
use super::regs::NTC_L4_SHIFT;
use super::regs::NtupleCtl;
use super::ring::RingAction;
use super::table::FilterCtx;
use super::table::FilterTable;
use super::table::Placement;
use super::table::absent;
use super::table::binary;
use super::table::count_enabled;
use crate::api::FlowExt;
use crate::api::FlowRule;
use crate::api::FlowSpec;
use crate::api::IP_USER_FLOW_V4;
use crate::api::IPPROTO_ICMP;
use crate::api::IPPROTO_ICMPV6;
use crate::api::IPPROTO_SCTP;
use crate::api::IPPROTO_TCP;
use crate::api::IPPROTO_UDP;
use crate::api::Ipv4Addr;
use crate::api::Ipv4L4Spec;
use crate::api::Ipv4UserSpec;
use crate::api::Ipv6Addr;
use crate::api::Ipv6L4Spec;
use crate::api::Ipv6UserSpec;
use crate::api::Masked;
use crate::api::NTUPLE_MAX_SLOTS;
use crate::api::RuleLocation;
use crate::api::RxfError;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum L4Proto {
    Tcp,
    Udp,
    Sctp,
    Icmp,
}

impl L4Proto {
    /// The legacy control word encoding.
    fn legacy(self) -> u32 {
        match self {
            Self::Tcp => 0,
            Self::Udp => 1,
            Self::Sctp => 2,
            Self::Icmp => 3,
        }
    }

    /// The IP protocol number, as matched by generation-2 L3 atoms.
    pub fn ip_proto(self, v6: bool) -> u8 {
        match self {
            Self::Tcp => IPPROTO_TCP,
            Self::Udp => IPPROTO_UDP,
            Self::Sctp => IPPROTO_SCTP,
            Self::Icmp if v6 => IPPROTO_ICMPV6,
            Self::Icmp => IPPROTO_ICMP,
        }
    }
}

impl Display for L4Proto {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Sctp => "SCTP",
            Self::Icmp => "ICMP",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NtupleAddrs {
    V4 { src: Option<Ipv4Addr>, dst: Option<Ipv4Addr> },
    V6 { src: Option<Ipv6Addr>, dst: Option<Ipv6Addr> },
}

/// The fields of an n-tuple rule, each present or absent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NtupleMatch {
    pub addrs: NtupleAddrs,
    pub proto: Option<L4Proto>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl NtupleMatch {
    pub fn is_v6(&self) -> bool {
        matches!(self.addrs, NtupleAddrs::V6 { .. })
    }

    fn v4_l4(spec: &Ipv4L4Spec, proto: L4Proto) -> Result<Self, RxfError> {
        absent(&spec.tos, "tos")?;

        Ok(Self {
            addrs: NtupleAddrs::V4 {
                src: binary(&spec.src, "src_ip")?,
                dst: binary(&spec.dst, "dst_ip")?,
            },
            proto: Some(proto),
            src_port: binary(&spec.src_port, "src_port")?,
            dst_port: binary(&spec.dst_port, "dst_port")?,
        })
    }

    fn v6_l4(spec: &Ipv6L4Spec, proto: L4Proto) -> Result<Self, RxfError> {
        absent(&spec.tclass, "tclass")?;

        Ok(Self {
            addrs: NtupleAddrs::V6 {
                src: binary(&spec.src, "src_ip")?,
                dst: binary(&spec.dst, "dst_ip")?,
            },
            proto: Some(proto),
            src_port: binary(&spec.src_port, "src_port")?,
            dst_port: binary(&spec.dst_port, "dst_port")?,
        })
    }

    fn v4_user(spec: &Ipv4UserSpec) -> Result<Self, RxfError> {
        absent(&spec.l4_4_bytes, "l4_4_bytes")?;
        absent(&spec.tos, "tos")?;

        if spec.ip_ver != IP_USER_FLOW_V4 {
            return Err(RxfError::MalformedRule(format!(
                "unsupported ip_ver {}",
                spec.ip_ver
            )));
        }

        Ok(Self {
            addrs: NtupleAddrs::V4 {
                src: binary(&spec.src, "src_ip")?,
                dst: binary(&spec.dst, "dst_ip")?,
            },
            proto: user_proto(&spec.proto, IPPROTO_ICMP)?,
            src_port: None,
            dst_port: None,
        })
    }

    fn v6_user(spec: &Ipv6UserSpec) -> Result<Self, RxfError> {
        absent(&spec.l4_4_bytes, "l4_4_bytes")?;
        absent(&spec.tclass, "tclass")?;

        Ok(Self {
            addrs: NtupleAddrs::V6 {
                src: binary(&spec.src, "src_ip")?,
                dst: binary(&spec.dst, "dst_ip")?,
            },
            proto: user_proto(&spec.l4_proto, IPPROTO_ICMPV6)?,
            src_port: None,
            dst_port: None,
        })
    }

    pub fn from_rule(
        flow: &FlowSpec,
        ext: Option<&FlowExt>,
    ) -> Result<Self, RxfError> {
        if let Some(ext) = ext {
            absent(&ext.vlan_etype, "vlan_etype")?;
            absent(&ext.vlan_tci, "vlan_tci")?;
            absent(&ext.data, "user_data")?;
        }

        match flow {
            FlowSpec::TcpV4(s) => Self::v4_l4(s, L4Proto::Tcp),
            FlowSpec::UdpV4(s) => Self::v4_l4(s, L4Proto::Udp),
            FlowSpec::SctpV4(s) => Self::v4_l4(s, L4Proto::Sctp),
            FlowSpec::Ip4User(s) => Self::v4_user(s),
            FlowSpec::TcpV6(s) => Self::v6_l4(s, L4Proto::Tcp),
            FlowSpec::UdpV6(s) => Self::v6_l4(s, L4Proto::Udp),
            FlowSpec::SctpV6(s) => Self::v6_l4(s, L4Proto::Sctp),
            FlowSpec::Ip6User(s) => Self::v6_user(s),
            FlowSpec::Ether(_) => Err(RxfError::MalformedRule(
                "ether flow-type not supported by n-tuple filters".into(),
            )),
        }
    }

    /// Rebuild the flow spec, with absent fields as wildcards.
    pub fn to_flow(&self) -> FlowSpec {
        let src_port = Masked::from_option(self.src_port);
        let dst_port = Masked::from_option(self.dst_port);

        match self.addrs {
            NtupleAddrs::V4 { src, dst } => {
                let (src, dst) =
                    (Masked::from_option(src), Masked::from_option(dst));
                let l4 = Ipv4L4Spec {
                    src,
                    dst,
                    src_port,
                    dst_port,
                    ..Default::default()
                };

                match self.proto {
                    Some(L4Proto::Tcp) => FlowSpec::TcpV4(l4),
                    Some(L4Proto::Udp) => FlowSpec::UdpV4(l4),
                    Some(L4Proto::Sctp) => FlowSpec::SctpV4(l4),
                    Some(L4Proto::Icmp) | None => {
                        FlowSpec::Ip4User(Ipv4UserSpec {
                            src,
                            dst,
                            proto: Masked::from_option(
                                self.proto.map(|p| p.ip_proto(false)),
                            ),
                            ..Default::default()
                        })
                    }
                }
            }

            NtupleAddrs::V6 { src, dst } => {
                let (src, dst) =
                    (Masked::from_option(src), Masked::from_option(dst));
                let l4 = Ipv6L4Spec {
                    src,
                    dst,
                    src_port,
                    dst_port,
                    ..Default::default()
                };

                match self.proto {
                    Some(L4Proto::Tcp) => FlowSpec::TcpV6(l4),
                    Some(L4Proto::Udp) => FlowSpec::UdpV6(l4),
                    Some(L4Proto::Sctp) => FlowSpec::SctpV6(l4),
                    Some(L4Proto::Icmp) | None => {
                        FlowSpec::Ip6User(Ipv6UserSpec {
                            src,
                            dst,
                            l4_proto: Masked::from_option(
                                self.proto.map(|p| p.ip_proto(true)),
                            ),
                            ..Default::default()
                        })
                    }
                }
            }
        }
    }

    /// The legacy control word, less the action.
    pub fn legacy_ctl(&self) -> u32 {
        let mut ctl = NtupleCtl::EN;
        let mut proto = 0;

        if let Some(p) = self.proto {
            ctl |= NtupleCtl::PROTO;
            proto = (p.legacy() & NTC_L4_MASK) << NTC_L4_SHIFT;
        }

        let (sa, da) = match self.addrs {
            NtupleAddrs::V4 { src, dst } => (src.is_some(), dst.is_some()),
            NtupleAddrs::V6 { src, dst } => {
                ctl |= NtupleCtl::V6;
                (src.is_some(), dst.is_some())
            }
        };

        ctl.set(NtupleCtl::SA, sa);
        ctl.set(NtupleCtl::DA, da);
        ctl.set(NtupleCtl::SP, self.src_port.is_some());
        ctl.set(NtupleCtl::DP, self.dst_port.is_some());
        ctl.bits() | proto
    }
}

/// The protocol of a raw IP flow: only ICMP can be matched.
fn user_proto(
    proto: &Masked<u8>,
    icmp: u8,
) -> Result<Option<L4Proto>, RxfError> {
    match binary(proto, "proto")? {
        None => Ok(None),
        Some(p) if p == icmp => Ok(Some(L4Proto::Icmp)),
        Some(p) => Err(RxfError::MalformedRule(format!(
            "unsupported protocol {p} for raw IP flow"
        ))),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NtupleSlot {
    pub m: NtupleMatch,
    pub action: RingAction,
}

impl NtupleSlot {
    /// The full legacy control word.
    pub fn cmd(&self) -> u32 {
        self.m.legacy_ctl() | self.action.legacy_bits(NTUPLE_RXQ)
    }
}

pub struct NtupleTable {
    slots: Vec<Option<NtupleSlot>>,
    /// Slots taken by an IPv6 rule.
    v6_span: u8,
}

impl NtupleTable {
    pub fn new(v6_span: u8) -> Self {
        Self { slots: vec![None; NTUPLE_MAX_SLOTS as usize], v6_span }
    }

    pub fn slot(&self, idx: SlotIdx) -> Option<&NtupleSlot> {
        self.slots.get(idx.index()).and_then(Option::as_ref)
    }

    /// The IPv6 rule whose span covers `idx`, other than one starting
    /// at `idx` itself.
    fn shadowed_by(&self, idx: SlotIdx) -> Option<SlotIdx> {
        if self.v6_span <= 1 {
            return None;
        }

        let start = SlotIdx(idx.0 - idx.0 % self.v6_span);
        if start == idx {
            return None;
        }

        self.slot(start).filter(|s| s.m.is_v6()).map(|_| start)
    }

    /// Can a rule matching `m` go into slot `idx`?
    fn check_span(
        &self,
        ctx: &FilterCtx,
        idx: SlotIdx,
        m: &NtupleMatch,
    ) -> Result<(), RxfError> {
        if !m.is_v6() {
            return match self.shadowed_by(idx) {
                Some(v6) => Err(RxfError::MalformedRule(format!(
                    "slot {} is covered by the IPv6 filter @{}",
                    ctx.location(idx),
                    ctx.location(v6)
                ))),
                None => Ok(()),
            };
        }

        let span = self.v6_span;
        if span <= 1 {
            return Ok(());
        }

        if idx.0 % span != 0 {
            return Err(RxfError::MalformedRule(format!(
                "IPv6 n-tuple filter @{} must start on a multiple of {span}",
                ctx.location(idx)
            )));
        }

        if (idx.0 + span) as u32 > ctx.desc.max() {
            return Err(ctx.table_full(Some(idx)));
        }

        for i in 1..span {
            let next = SlotIdx(idx.0 + i);
            if self.is_enabled(next) {
                return Err(RxfError::MalformedRule(format!(
                    "IPv6 n-tuple filter @{} overlaps the filter @{}",
                    ctx.location(idx),
                    ctx.location(next)
                )));
            }
        }

        Ok(())
    }

    fn place(
        &self,
        ctx: &FilterCtx,
        m: &NtupleMatch,
    ) -> Result<SlotIdx, RxfError> {
        ctx.desc
            .slots()
            .find(|idx| {
                !self.is_occupied(*idx) && self.check_span(ctx, *idx, m).is_ok()
            })
            .ok_or_else(|| ctx.table_full(None))
    }
}

impl FilterTable for NtupleTable {
    fn check(&self, rule: &FlowRule) -> bool {
        rule.flow.is_ip()
    }

    fn get(
        &self,
        desc: &CategoryDesc,
        idx: SlotIdx,
    ) -> Result<FlowRule, RxfError> {
        let location = desc.location(idx);
        let slot = self.slot(idx).ok_or(RxfError::RuleNotFound(location))?;

        Ok(FlowRule {
            location: RuleLocation::At(location),
            flow: slot.m.to_flow(),
            ext: None,
            ring_cookie: slot.action.cookie(),
        })
    }

    fn set(
        &mut self,
        ctx: &mut FilterCtx,
        rule: &FlowRule,
        at: Placement,
    ) -> Result<SlotIdx, RxfError> {
        let m = NtupleMatch::from_rule(&rule.flow, rule.ext.as_ref())?;
        let action = ctx.rings.validate(rule.ring_cookie)?;

        let idx = match at {
            Placement::At(idx) => {
                self.check_span(ctx, idx, &m)?;
                idx
            }
            Placement::Any => self.place(ctx, &m)?,
        };

        ctx.rpf.bind_ntuple(idx, &m)?;
        self.slots[idx.index()] = Some(NtupleSlot { m, action });
        self.update(ctx, idx);
        Ok(idx)
    }

    fn delete(
        &mut self,
        ctx: &mut FilterCtx,
        idx: SlotIdx,
    ) -> Result<(), RxfError> {
        if self.slot(idx).is_none() {
            return Err(RxfError::InvalidLocation(ctx.location(idx)));
        }

        self.slots[idx.index()] = None;
        ctx.rpf.unbind_ntuple(idx);
        self.update(ctx, idx);
        Ok(())
    }

    fn update(&self, ctx: &mut FilterCtx, idx: SlotIdx) {
        ctx.rpf.program_ntuple(&mut *ctx.regs, idx, self.slot(idx));
    }

    fn is_enabled(&self, idx: SlotIdx) -> bool {
        self.slot(idx).is_some()
    }

    fn is_occupied(&self, idx: SlotIdx) -> bool {
        self.is_enabled(idx) || self.shadowed_by(idx).is_some()
    }

    fn count(&self) -> u32 {
        count_enabled(&self.slots)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tcp4_dport(port: u16) -> FlowSpec {
        FlowSpec::TcpV4(Ipv4L4Spec {
            dst_port: Masked::exact(port),
            ..Default::default()
        })
    }

    #[test]
    fn tcp4_round_trip() {
        let flow = tcp4_dport(80);
        let m = NtupleMatch::from_rule(&flow, None).unwrap();
        assert_eq!(m.proto, Some(L4Proto::Tcp));
        assert_eq!(m.dst_port, Some(80));
        assert_eq!(m.src_port, None);
        assert_eq!(m.to_flow(), flow);
    }

    #[test]
    fn partial_masks_rejected() {
        let flow = FlowSpec::UdpV4(Ipv4L4Spec {
            src: Masked {
                value: "10.0.0.1".parse().unwrap(),
                mask: Ipv4Addr::from([0xff, 0xff, 0xff, 0]),
            },
            ..Default::default()
        });
        assert!(matches!(
            NtupleMatch::from_rule(&flow, None),
            Err(RxfError::MalformedRule(_))
        ));

        let flow = FlowSpec::TcpV4(Ipv4L4Spec {
            tos: Masked::exact(4),
            ..Default::default()
        });
        assert!(NtupleMatch::from_rule(&flow, None).is_err());
    }

    #[test]
    fn raw_ip_protocols() {
        let icmp = FlowSpec::Ip4User(Ipv4UserSpec {
            proto: Masked::exact(IPPROTO_ICMP),
            ..Default::default()
        });
        let m = NtupleMatch::from_rule(&icmp, None).unwrap();
        assert_eq!(m.proto, Some(L4Proto::Icmp));
        assert_eq!(m.to_flow(), icmp);

        let gre = FlowSpec::Ip4User(Ipv4UserSpec {
            proto: Masked::exact(47),
            ..Default::default()
        });
        assert!(NtupleMatch::from_rule(&gre, None).is_err());

        let v6 = FlowSpec::Ip4User(Ipv4UserSpec {
            ip_ver: 2,
            ..Default::default()
        });
        assert!(NtupleMatch::from_rule(&v6, None).is_err());
    }

    #[test]
    fn ext_fields_rejected() {
        let ext = FlowExt { vlan_tci: Masked::exact(5), ..Default::default() };
        assert!(NtupleMatch::from_rule(&tcp4_dport(80), Some(&ext)).is_err());
        assert!(
            NtupleMatch::from_rule(&tcp4_dport(80), Some(&FlowExt::default()))
                .is_ok()
        );
    }

    #[test]
    fn legacy_ctl_word() {
        let m = NtupleMatch::from_rule(&tcp4_dport(80), None).unwrap();
        let ctl = NtupleCtl::EN | NtupleCtl::PROTO | NtupleCtl::DP;
        assert_eq!(m.legacy_ctl(), ctl.bits());

        let slot = NtupleSlot { m, action: RingAction::Queue(3) };
        assert_eq!(slot.cmd(), ctl.bits() | 0x0021_0300);

        let udp6 = FlowSpec::UdpV6(Ipv6L4Spec {
            src: Masked::exact("fd00::1".parse().unwrap()),
            ..Default::default()
        });
        let m = NtupleMatch::from_rule(&udp6, None).unwrap();
        let ctl = NtupleCtl::EN | NtupleCtl::PROTO | NtupleCtl::SA | NtupleCtl::V6;
        assert_eq!(m.legacy_ctl(), ctl.bits() | 1);
    }
}
