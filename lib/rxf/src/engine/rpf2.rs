// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Second-generation filter programming.
//!
//! Filters no longer carry their action. Each one stamps a tag into
//! the packet's tag word, and the action-resolution table (ART) maps
//! tag patterns to actions. N-tuple rules are split into an L3 atom
//! (addresses and protocol) and an optional L4 atom (ports). Atoms
//! live in small shared register files, so identical atoms are
//! interned and reference counted, as are EtherType action tags.
//!
//! Binding only touches the pools. An atom that was just taken, or
//! just let go by its last user, is marked stale, and the next slot
//! programming rewrites its registers from the pool. Taking another
//! reference to a live atom writes nothing.

use super::etype::EtypeSlot;
use super::flex::FlexSlot;
use super::location::SlotIdx;
use super::ntuple::NtupleAddrs;
use super::ntuple::NtupleMatch;
use super::ntuple::NtupleSlot;
use super::pool::Probe;
use super::pool::RefPool;
use super::regs::*;
use super::ring::Gen2Action;
use super::ring::RingAction;
use super::rpf::Rpf;
use super::vlan::VlanSlot;
use crate::api::ETYPE_MAX_SLOTS;
use crate::api::FilterKind;
use crate::api::Generation;
use crate::api::Ipv4Addr;
use crate::api::Ipv6Addr;
use crate::api::NTUPLE_MAX_SLOTS;
use crate::api::PoolDump;
use crate::api::RxfError;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;

/// The VLAN tag shared by every slot that simply accepts.
const VLAN_TAG_ACCEPT: u32 = 1;

/// The fields of an L3 atom.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct L3Key<A> {
    pub src: Option<A>,
    pub dst: Option<A>,
    pub proto: Option<u8>,
}

impl<A: Display> Display for L3Key<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fields = [
            self.src.as_ref().map(|a| format!("src={a}")),
            self.dst.as_ref().map(|a| format!("dst={a}")),
            self.proto.map(|p| format!("proto={p}")),
        ];

        let mut present = fields.into_iter().flatten().peekable();
        if present.peek().is_none() {
            return write!(f, "*");
        }

        write!(f, "{}", present.format(" "))
    }
}

impl<A: Copy> L3Key<A> {
    fn is_empty(&self) -> bool {
        self.src.is_none() && self.dst.is_none() && self.proto.is_none()
    }

    fn ctl_half(&self, tag: u32) -> u32 {
        let mut ctl = L3Ctl::EN;
        ctl.set(L3Ctl::SA, self.src.is_some());
        ctl.set(L3Ctl::DA, self.dst.is_some());
        ctl.set(L3Ctl::PROTO, self.proto.is_some());

        ctl.bits()
            | (tag << L3_TAG_SHIFT)
            | ((self.proto.unwrap_or(0) as u32) << L3_PROTO_SHIFT)
    }
}

/// The fields of an L4 atom.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct L4Key {
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl L4Key {
    fn from_match(m: &NtupleMatch) -> Option<Self> {
        if m.src_port.is_none() && m.dst_port.is_none() {
            return None;
        }

        Some(Self { src_port: m.src_port, dst_port: m.dst_port })
    }
}

impl Display for L4Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.src_port, self.dst_port) {
            (Some(s), Some(d)) => write!(f, "sport={s} dport={d}"),
            (Some(s), None) => write!(f, "sport={s}"),
            (None, Some(d)) => write!(f, "dport={d}"),
            (None, None) => write!(f, "*"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum L3Ref {
    V4(u8),
    V6(u8),
}

/// An atom whose registers lag behind its pool entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StaleAtom {
    L3(L3Ref),
    L4(u8),
}

/// The atoms held by one n-tuple slot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct NtupleBinding {
    l3: Option<L3Ref>,
    l4: Option<u8>,
}

enum L3Pending {
    V4(Probe, L3Key<Ipv4Addr>),
    V6(Probe, L3Key<Ipv6Addr>),
}

impl L3Pending {
    fn to_ref(&self) -> L3Ref {
        match self {
            Self::V4(p, _) => L3Ref::V4(p.idx),
            Self::V6(p, _) => L3Ref::V6(p.idx),
        }
    }
}

/// Pool and resolver sizing for a generation-2 device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Rpf2Layout {
    pub etype_tag_top: u8,
    pub l3_v4_atoms: u8,
    pub l3_v6_atoms: u8,
    pub l4_atoms: u8,
    pub art_base: u32,
}

pub struct Rpf2 {
    art_base: u32,
    etype_tags: RefPool<Gen2Action>,
    etype_refs: Vec<Option<u8>>,
    l3_v4: RefPool<L3Key<Ipv4Addr>>,
    l3_v6: RefPool<L3Key<Ipv6Addr>>,
    l4: RefPool<L4Key>,
    ntuple_refs: Vec<NtupleBinding>,
    stale: Vec<StaleAtom>,
}

// Pool entry `i` is tagged `i + 1`; a zero tag never matches.
fn tag(idx: u8) -> u32 {
    idx as u32 + 1
}

fn write_l3_v4(regs: &mut dyn RegPort, i: u8, key: &L3Key<Ipv4Addr>) {
    regs.write(Reg::L3V4Src(i), key.src.map_or(0, |ip| ip.to_be_u32()));
    regs.write(Reg::L3V4Dst(i), key.dst.map_or(0, |ip| ip.to_be_u32()));
    let cur = regs.read(Reg::L3Ctrl(i));
    regs.write(Reg::L3Ctrl(i), (cur & L3_V6_HALF) | key.ctl_half(tag(i)));
}

fn clear_l3_v4(regs: &mut dyn RegPort, i: u8) {
    let cur = regs.read(Reg::L3Ctrl(i));
    regs.write(Reg::L3Ctrl(i), cur & L3_V6_HALF);
    regs.write(Reg::L3V4Src(i), 0);
    regs.write(Reg::L3V4Dst(i), 0);
}

fn write_l3_v6(regs: &mut dyn RegPort, i: u8, key: &L3Key<Ipv6Addr>) {
    let src = key.src.map_or([0; 4], |ip| ip.words());
    let dst = key.dst.map_or([0; 4], |ip| ip.words());
    for w in 0..4u8 {
        regs.write(Reg::L3V6Src(i, w), src[3 - w as usize]);
        regs.write(Reg::L3V6Dst(i, w), dst[3 - w as usize]);
    }

    let cur = regs.read(Reg::L3Ctrl(i));
    let half = key.ctl_half(tag(i)) << L3_V6_HALF_SHIFT;
    regs.write(Reg::L3Ctrl(i), (cur & L3_V4_HALF) | half);
}

fn clear_l3_v6(regs: &mut dyn RegPort, i: u8) {
    let cur = regs.read(Reg::L3Ctrl(i));
    regs.write(Reg::L3Ctrl(i), cur & L3_V4_HALF);
    for w in 0..4u8 {
        regs.write(Reg::L3V6Src(i, w), 0);
        regs.write(Reg::L3V6Dst(i, w), 0);
    }
}

fn write_l4(regs: &mut dyn RegPort, i: u8, key: &L4Key) {
    let mut ctl = L4Ctl::EN;
    ctl.set(L4Ctl::SP, key.src_port.is_some());
    ctl.set(L4Ctl::DP, key.dst_port.is_some());

    regs.write(Reg::NtupleSrcPort(i), key.src_port.unwrap_or(0) as u32);
    regs.write(Reg::NtupleDstPort(i), key.dst_port.unwrap_or(0) as u32);
    regs.write(Reg::L4Ctrl(i), ctl.bits() | (tag(i) << L4_TAG_SHIFT));
}

fn clear_l4(regs: &mut dyn RegPort, i: u8) {
    regs.write(Reg::L4Ctrl(i), 0);
    regs.write(Reg::NtupleSrcPort(i), 0);
    regs.write(Reg::NtupleDstPort(i), 0);
}

impl Rpf2 {
    pub fn new(layout: &Rpf2Layout) -> Self {
        Self {
            art_base: layout.art_base,
            etype_tags: RefPool::new("etype-tags", layout.etype_tag_top),
            etype_refs: vec![None; ETYPE_MAX_SLOTS as usize],
            l3_v4: RefPool::new("l3-v4", layout.l3_v4_atoms),
            l3_v6: RefPool::new("l3-v6", layout.l3_v6_atoms),
            l4: RefPool::new("l4", layout.l4_atoms),
            ntuple_refs: vec![
                NtupleBinding::default();
                NTUPLE_MAX_SLOTS as usize
            ],
            stale: Vec::new(),
        }
    }

    fn art_index(&self, user: u32, idx: SlotIdx) -> u32 {
        self.art_base + user + idx.0 as u32
    }

    fn acquire_l3(&mut self, l3: &L3Pending) {
        let (probe, l3ref) = match l3 {
            L3Pending::V4(p, key) => {
                self.l3_v4.acquire(p.idx, key);
                (p, L3Ref::V4(p.idx))
            }
            L3Pending::V6(p, key) => {
                self.l3_v6.acquire(p.idx, key);
                (p, L3Ref::V6(p.idx))
            }
        };

        if probe.is_new {
            self.stale.push(StaleAtom::L3(l3ref));
        }
    }

    fn release_l3(&mut self, l3: L3Ref) {
        let freed = match l3 {
            L3Ref::V4(i) => self.l3_v4.release(i),
            L3Ref::V6(i) => self.l3_v6.release(i),
        };

        if freed {
            self.stale.push(StaleAtom::L3(l3));
        }
    }

    fn release_l4(&mut self, i: u8) {
        if self.l4.release(i) {
            self.stale.push(StaleAtom::L4(i));
        }
    }

    /// Bring the registers of every stale atom in line with its pool
    /// entry.
    fn flush_atoms(&mut self, regs: &mut dyn RegPort) {
        for atom in core::mem::take(&mut self.stale) {
            match atom {
                StaleAtom::L3(L3Ref::V4(i)) => match self.l3_v4.key(i) {
                    Some(key) => write_l3_v4(regs, i, key),
                    None => clear_l3_v4(regs, i),
                },

                StaleAtom::L3(L3Ref::V6(i)) => match self.l3_v6.key(i) {
                    Some(key) => write_l3_v6(regs, i, key),
                    None => clear_l3_v6(regs, i),
                },

                StaleAtom::L4(i) => match self.l4.key(i) {
                    Some(key) => write_l4(regs, i, key),
                    None => clear_l4(regs, i),
                },
            }
        }
    }

    /// A rule matching no L3 field takes no L3 atom.
    fn probe_l3(
        &self,
        m: &NtupleMatch,
    ) -> Result<Option<L3Pending>, RxfError> {
        match m.addrs {
            NtupleAddrs::V4 { src, dst } => {
                let key = L3Key {
                    src,
                    dst,
                    proto: m.proto.map(|p| p.ip_proto(false)),
                };
                if key.is_empty() {
                    return Ok(None);
                }
                Ok(Some(L3Pending::V4(self.l3_v4.probe(&key)?, key)))
            }

            NtupleAddrs::V6 { src, dst } => {
                let key = L3Key {
                    src,
                    dst,
                    proto: m.proto.map(|p| p.ip_proto(true)),
                };
                if key.is_empty() {
                    return Ok(None);
                }
                Ok(Some(L3Pending::V6(self.l3_v6.probe(&key)?, key)))
            }
        }
    }
}

impl Rpf for Rpf2 {
    fn generation(&self) -> Generation {
        Generation::Rpf2
    }

    fn program_vlan(
        &self,
        regs: &mut dyn RegPort,
        idx: SlotIdx,
        slot: Option<&VlanSlot>,
    ) {
        let art = self.art_index(ART_VLAN_USER, idx);

        match slot.map(|s| s.action) {
            None => {
                regs.write(Reg::VlanTag(idx.0), 0);
                regs.write_art(art, ArtEntry::DISABLED);
            }

            Some(RingAction::Any) => {
                regs.write(Reg::VlanTag(idx.0), VLAN_TAG_ACCEPT);
                regs.write_art(art, ArtEntry::DISABLED);
            }

            Some(action) => {
                let tag = idx.0 as u32 + 2;
                regs.write(Reg::VlanTag(idx.0), tag);
                regs.write_art(
                    art,
                    ArtEntry {
                        tag: tag << ART_TAG_VLAN_SHIFT,
                        mask: ART_TAG_VLAN_MASK,
                        action: action.gen2(),
                    },
                );
            }
        }
    }

    fn program_etype(
        &self,
        regs: &mut dyn RegPort,
        idx: SlotIdx,
        slot: Option<&EtypeSlot>,
    ) {
        let art = self.art_index(ART_ETYPE_USER, idx);
        let bound = self.etype_refs.get(idx.index()).copied().flatten();

        match (slot, bound) {
            (Some(slot), Some(t)) => {
                regs.write(Reg::EtypeTag(idx.0), tag(t));
                regs.write_art(
                    art,
                    ArtEntry {
                        tag: tag(t) << ART_TAG_ET_SHIFT,
                        mask: ART_TAG_ET_MASK,
                        action: slot.action.gen2(),
                    },
                );
            }

            _ => {
                regs.write(Reg::EtypeTag(idx.0), 0);
                regs.write_art(art, ArtEntry::DISABLED);
            }
        }
    }

    fn program_flex(
        &self,
        regs: &mut dyn RegPort,
        idx: SlotIdx,
        slot: Option<&FlexSlot>,
    ) {
        let art = self.art_index(ART_FLEX_USER, idx);

        match slot {
            Some(slot) => {
                regs.write(Reg::FlexTag(idx.0), tag(idx.0));
                regs.write_art(
                    art,
                    ArtEntry {
                        tag: tag(idx.0) << ART_TAG_FLEX_SHIFT,
                        mask: ART_TAG_FLEX_MASK,
                        action: slot.action.gen2(),
                    },
                );
            }

            None => {
                regs.write(Reg::FlexTag(idx.0), 0);
                regs.write_art(art, ArtEntry::DISABLED);
            }
        }
    }

    fn program_ntuple(
        &mut self,
        regs: &mut dyn RegPort,
        idx: SlotIdx,
        slot: Option<&NtupleSlot>,
    ) {
        self.flush_atoms(regs);

        let art = self.art_index(ART_NTUPLE_USER, idx);
        let Some(slot) = slot else {
            regs.write_art(art, ArtEntry::DISABLED);
            return;
        };

        let binding =
            self.ntuple_refs.get(idx.index()).copied().unwrap_or_default();
        let mut entry = ArtEntry { tag: 0, mask: 0, action: slot.action.gen2() };

        match binding.l3 {
            Some(L3Ref::V4(i)) => {
                entry.tag |= tag(i) << ART_TAG_L3_V4_SHIFT;
                entry.mask |= ART_TAG_L3_V4_MASK;
            }
            Some(L3Ref::V6(i)) => {
                entry.tag |= tag(i) << ART_TAG_L3_V6_SHIFT;
                entry.mask |= ART_TAG_L3_V6_MASK;
            }
            None => (),
        }

        if let Some(i) = binding.l4 {
            entry.tag |= tag(i) << ART_TAG_L4_SHIFT;
            entry.mask |= ART_TAG_L4_MASK;
        }

        regs.write_art(art, entry);
    }

    fn bind_etype(
        &mut self,
        idx: SlotIdx,
        action: RingAction,
    ) -> Result<(), RxfError> {
        let key = action.gen2();
        let old = self.etype_refs[idx.index()]
            .and_then(|t| self.etype_tags.key(t).map(|k| (t, *k)));

        if old.is_some_and(|(_, old_key)| old_key == key) {
            return Ok(());
        }

        // The old tag goes first so a slot holding the last reference
        // can take the freed entry for its new action.
        if let Some((t, _)) = old {
            self.etype_tags.release(t);
        }

        let probe = match self.etype_tags.probe(&key) {
            Ok(probe) => probe,
            Err(e) => {
                if let Some((t, old_key)) = old {
                    self.etype_tags.acquire(t, &old_key);
                }
                return Err(e);
            }
        };

        self.etype_tags.acquire(probe.idx, &key);
        self.etype_refs[idx.index()] = Some(probe.idx);
        Ok(())
    }

    fn unbind_etype(&mut self, idx: SlotIdx) {
        if let Some(old) = self.etype_refs[idx.index()].take() {
            self.etype_tags.release(old);
        }
    }

    fn bind_ntuple(
        &mut self,
        idx: SlotIdx,
        m: &NtupleMatch,
    ) -> Result<(), RxfError> {
        // Every pool is probed before any is touched, so exhaustion
        // leaves nothing half bound.
        let l3 = self.probe_l3(m)?;
        let l4 = match L4Key::from_match(m) {
            Some(key) => Some((self.l4.probe(&key)?, key)),
            None => None,
        };

        let old = self.ntuple_refs[idx.index()];
        let new = NtupleBinding {
            l3: l3.as_ref().map(L3Pending::to_ref),
            l4: l4.as_ref().map(|(p, _)| p.idx),
        };

        if old.l3 != new.l3 {
            if let Some(l3) = &l3 {
                self.acquire_l3(l3);
            }

            if let Some(old) = old.l3 {
                self.release_l3(old);
            }
        }

        if old.l4 != new.l4 {
            if let Some((p, key)) = &l4 {
                self.l4.acquire(p.idx, key);
                if p.is_new {
                    self.stale.push(StaleAtom::L4(p.idx));
                }
            }

            if let Some(old) = old.l4 {
                self.release_l4(old);
            }
        }

        self.ntuple_refs[idx.index()] = new;
        Ok(())
    }

    fn unbind_ntuple(&mut self, idx: SlotIdx) {
        let old = core::mem::take(&mut self.ntuple_refs[idx.index()]);

        if let Some(l3) = old.l3 {
            self.release_l3(l3);
        }

        if let Some(l4) = old.l4 {
            self.release_l4(l4);
        }
    }

    fn refresh(&self, regs: &mut dyn RegPort) {
        for (i, _, key) in self.l3_v4.live() {
            write_l3_v4(regs, i, key);
        }

        for (i, _, key) in self.l3_v6.live() {
            write_l3_v6(regs, i, key);
        }

        for (i, _, key) in self.l4.live() {
            write_l4(regs, i, key);
        }
    }

    fn pools(&self) -> Vec<PoolDump> {
        vec![
            self.etype_tags.dump(),
            self.l3_v4.dump(),
            self.l3_v6.dump(),
            self.l4.dump(),
        ]
    }

    fn binding(&self, kind: FilterKind, idx: SlotIdx) -> Option<String> {
        match kind {
            FilterKind::Etype => self
                .etype_refs
                .get(idx.index())
                .copied()
                .flatten()
                .map(|t| format!("tag {}", tag(t))),

            FilterKind::Ntuple => {
                let b = self.ntuple_refs.get(idx.index())?;
                let l3 = b.l3.map(|l3| match l3 {
                    L3Ref::V4(i) => format!("l3-v4 #{i}"),
                    L3Ref::V6(i) => format!("l3-v6 #{i}"),
                });
                let l4 = b.l4.map(|i| format!("l4 #{i}"));
                Some(format!("{}", l3.into_iter().chain(l4).format(", ")))
            }

            FilterKind::Flex => Some(format!("tag {}", tag(idx.0))),

            FilterKind::Vlan => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::ntuple::L4Proto;

    const LAYOUT: Rpf2Layout = Rpf2Layout {
        etype_tag_top: 2,
        l3_v4_atoms: 2,
        l3_v6_atoms: 2,
        l4_atoms: 2,
        art_base: 0,
    };

    fn tcp4(dst: &str, dport: Option<u16>) -> NtupleMatch {
        NtupleMatch {
            addrs: NtupleAddrs::V4 { src: None, dst: Some(dst.parse().unwrap()) },
            proto: Some(L4Proto::Tcp),
            src_port: None,
            dst_port: dport,
        }
    }

    fn bind(
        rpf: &mut Rpf2,
        regs: &mut MemRegs,
        idx: u8,
        m: &NtupleMatch,
    ) -> Result<(), RxfError> {
        rpf.bind_ntuple(SlotIdx(idx), m)?;
        rpf.flush_atoms(regs);
        Ok(())
    }

    fn unbind(rpf: &mut Rpf2, regs: &mut MemRegs, idx: u8) {
        rpf.unbind_ntuple(SlotIdx(idx));
        rpf.flush_atoms(regs);
    }

    #[test]
    fn shared_l3_atom_written_once() {
        let mut regs = MemRegs::new();
        let mut rpf = Rpf2::new(&LAYOUT);

        bind(&mut rpf, &mut regs, 0, &tcp4("10.0.0.1", Some(80)))
            .unwrap();
        bind(&mut rpf, &mut regs, 1, &tcp4("10.0.0.1", Some(443)))
            .unwrap();

        assert_eq!(rpf.l3_v4.usage(0), 2);
        assert_eq!(regs.write_count(Reg::L3Ctrl(0)), 1);
        assert_eq!(rpf.l4.usage(0), 1);
        assert_eq!(rpf.l4.usage(1), 1);

        let ctl = L3Ctl::EN | L3Ctl::DA | L3Ctl::PROTO;
        assert_eq!(
            regs.get(Reg::L3Ctrl(0)),
            ctl.bits() | (1 << L3_TAG_SHIFT) | (6 << L3_PROTO_SHIFT)
        );

        unbind(&mut rpf, &mut regs, 0);
        assert_eq!(rpf.l3_v4.usage(0), 1);
        assert_eq!(regs.write_count(Reg::L3Ctrl(0)), 1);
        assert_eq!(regs.get(Reg::L4Ctrl(0)), 0);

        unbind(&mut rpf, &mut regs, 1);
        assert_eq!(rpf.l3_v4.usage(0), 0);
        assert_eq!(regs.get(Reg::L3Ctrl(0)), 0);
    }

    #[test]
    fn v4_and_v6_atoms_share_a_register() {
        let mut regs = MemRegs::new();
        let mut rpf = Rpf2::new(&LAYOUT);
        let v6 = NtupleMatch {
            addrs: NtupleAddrs::V6 {
                src: Some("fd00::1".parse().unwrap()),
                dst: None,
            },
            proto: None,
            src_port: None,
            dst_port: None,
        };

        bind(&mut rpf, &mut regs, 0, &tcp4("10.0.0.1", None))
            .unwrap();
        bind(&mut rpf, &mut regs, 1, &v6).unwrap();

        let both = regs.get(Reg::L3Ctrl(0));
        assert_ne!(both & L3_V4_HALF, 0);
        assert_ne!(both & L3_V6_HALF, 0);
        assert_eq!(regs.get(Reg::L3V6Src(0, 0)), 1);

        unbind(&mut rpf, &mut regs, 0);
        assert_eq!(regs.get(Reg::L3Ctrl(0)), both & L3_V6_HALF);
    }

    #[test]
    fn exhaustion_leaves_binding_intact() {
        let mut regs = MemRegs::new();
        let mut rpf = Rpf2::new(&LAYOUT);

        bind(&mut rpf, &mut regs, 0, &tcp4("10.0.0.1", Some(1)))
            .unwrap();
        bind(&mut rpf, &mut regs, 1, &tcp4("10.0.0.2", Some(2)))
            .unwrap();

        // Both L3 atoms are taken; the L4 pool is full too.
        let err = bind(&mut rpf, &mut regs, 2, &tcp4("10.0.0.3", Some(1)))
            .unwrap_err();
        assert_eq!(err, RxfError::PoolExhausted("l3-v4".into()));
        assert_eq!(rpf.l4.usage(0), 1);
        assert_eq!(rpf.ntuple_refs[2], NtupleBinding::default());
    }

    #[test]
    fn rebind_releases_only_changed_atoms() {
        let mut regs = MemRegs::new();
        let mut rpf = Rpf2::new(&LAYOUT);

        bind(&mut rpf, &mut regs, 0, &tcp4("10.0.0.1", Some(80)))
            .unwrap();
        bind(&mut rpf, &mut regs, 0, &tcp4("10.0.0.1", Some(81)))
            .unwrap();

        assert_eq!(rpf.l3_v4.usage(0), 1);
        assert_eq!(regs.write_count(Reg::L3Ctrl(0)), 1);
        assert_eq!(rpf.l4.usage(0), 0);
        assert_eq!(rpf.l4.usage(1), 1);
        assert_eq!(regs.get(Reg::L4Ctrl(0)), 0);
    }

    #[test]
    fn etype_tags_follow_actions() {
        let mut rpf = Rpf2::new(&LAYOUT);

        rpf.bind_etype(SlotIdx(0), RingAction::Queue(1)).unwrap();
        rpf.bind_etype(SlotIdx(1), RingAction::Queue(1)).unwrap();
        rpf.bind_etype(SlotIdx(2), RingAction::Drop).unwrap();
        assert_eq!(rpf.etype_tags.usage(0), 2);
        assert_eq!(
            rpf.bind_etype(SlotIdx(3), RingAction::Any),
            Err(RxfError::PoolExhausted("etype-tags".into()))
        );

        // Overwriting a slot moves its reference.
        rpf.bind_etype(SlotIdx(1), RingAction::Drop).unwrap();
        assert_eq!(rpf.etype_tags.usage(0), 1);
        assert_eq!(rpf.etype_tags.usage(1), 2);

        rpf.unbind_etype(SlotIdx(0));
        assert_eq!(rpf.etype_tags.usage(0), 0);
        assert_eq!(rpf.binding(FilterKind::Etype, SlotIdx(2)).unwrap(), "tag 2");
    }

    #[test]
    fn etype_overwrite_reuses_its_own_tag() {
        let mut rpf = Rpf2::new(&Rpf2Layout { etype_tag_top: 1, ..LAYOUT });

        rpf.bind_etype(SlotIdx(0), RingAction::Queue(1)).unwrap();
        rpf.bind_etype(SlotIdx(0), RingAction::Drop).unwrap();
        assert_eq!(rpf.etype_tags.usage(0), 1);
        assert_eq!(rpf.etype_tags.key(0), Some(&RingAction::Drop.gen2()));

        // A shared tag can't be handed over, and a failed overwrite
        // keeps the old one.
        rpf.bind_etype(SlotIdx(1), RingAction::Drop).unwrap();
        assert_eq!(
            rpf.bind_etype(SlotIdx(1), RingAction::Queue(2)),
            Err(RxfError::PoolExhausted("etype-tags".into()))
        );
        assert_eq!(rpf.etype_tags.usage(0), 2);
        assert_eq!(rpf.etype_refs[1], Some(0));
    }

    #[test]
    fn wildcard_layers_take_no_atoms() {
        let mut regs = MemRegs::new();
        let mut rpf = Rpf2::new(&LAYOUT);
        let any_v4 = NtupleMatch {
            addrs: NtupleAddrs::V4 { src: None, dst: None },
            proto: None,
            src_port: None,
            dst_port: None,
        };

        bind(&mut rpf, &mut regs, 0, &any_v4).unwrap();
        assert_eq!(rpf.ntuple_refs[0], NtupleBinding::default());
        assert_eq!(rpf.l3_v4.live().count(), 0);
        assert_eq!(rpf.l4.live().count(), 0);
        assert_eq!(regs.nonzero().count(), 0);
    }

    #[test]
    fn atom_registers_follow_pool_state() {
        let mut regs = MemRegs::new();
        let mut rpf = Rpf2::new(&LAYOUT);
        let m = tcp4("10.0.0.1", Some(80));

        rpf.bind_ntuple(SlotIdx(0), &m).unwrap();
        assert_eq!(rpf.l3_v4.usage(0), 1);
        assert_eq!(regs.nonzero().count(), 0);

        let slot = NtupleSlot { m, action: RingAction::Queue(1) };
        rpf.program_ntuple(&mut regs, SlotIdx(0), Some(&slot));
        assert_eq!(regs.get(Reg::L3V4Dst(0)), 0x0a00_0001);
        assert_eq!(regs.get(Reg::NtupleDstPort(0)), 80);
        assert_ne!(regs.art(ART_NTUPLE_USER), ArtEntry::DISABLED);

        rpf.unbind_ntuple(SlotIdx(0));
        assert_ne!(regs.get(Reg::L3Ctrl(0)), 0);
        rpf.program_ntuple(&mut regs, SlotIdx(0), None);
        assert_eq!(regs.get(Reg::L3Ctrl(0)), 0);
        assert_eq!(regs.get(Reg::L4Ctrl(0)), 0);
        assert_eq!(regs.art(ART_NTUPLE_USER), ArtEntry::DISABLED);
    }
}
