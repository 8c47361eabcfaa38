// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Filter registers and the port used to reach them.
//!
//! The engine never touches hardware directly. Every write goes
//! through a [`RegPort`], which the driver implements on top of its
//! BAR mapping and which tests implement with [`MemRegs`].

use super::ring::Gen2Action;
use alloc::collections::BTreeMap;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;

/// Filter enable, common to every legacy filter control word.
pub const RXF_EN: u32 = crate::bit_on(31);
/// Deliver matching packets to the host rather than dropping them.
pub const RXF_ACT_TOHOST: u32 = crate::bit_on(16);
/// Width of the legacy queue field.
pub const RXF_RXQ_MASK: u32 = 0x1f;

pub const VLAN_VID_MASK: u32 = 0xfff;
pub const ETYPE_VAL_MASK: u32 = 0xffff;

/// Legacy n-tuple control word: protocol field.
pub const NTC_L4_SHIFT: u32 = 0;
pub const NTC_L4_MASK: u32 = 0x7;

bitflags! {
/// Legacy n-tuple control word flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NtupleCtl: u32 {
    const EN = RXF_EN;
    const PROTO = 1 << 26;
    const SA = 1 << 25;
    const DA = 1 << 24;
    const SP = 1 << 23;
    const DP = 1 << 22;
    const RXQ = 1 << 21;
    const V6 = 1 << 7;

    // The queue, protocol and action fields live between the flags.
    const _ = !0;
}
}

bitflags! {
/// One half of a generation-2 L3 filter register.
///
/// IPv4 atoms occupy the low half of the register, IPv6 atoms of the
/// same index the high half.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct L3Ctl: u32 {
    const EN = 1 << 0;
    const SA = 1 << 1;
    const DA = 1 << 2;
    const PROTO = 1 << 3;

    const _ = !0;
}
}

pub const L3_TAG_SHIFT: u32 = 4;
pub const L3_PROTO_SHIFT: u32 = 8;
pub const L3_V6_HALF_SHIFT: u32 = 16;
pub const L3_V4_HALF: u32 = 0x0000_FFFF;
pub const L3_V6_HALF: u32 = 0xFFFF_0000;

bitflags! {
/// Generation-2 L4 filter register.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct L4Ctl: u32 {
    const EN = 1 << 0;
    const SP = 1 << 1;
    const DP = 1 << 2;

    const _ = !0;
}
}

pub const L4_TAG_SHIFT: u32 = 4;

// Tag fields of the action-resolution table key.
pub const ART_TAG_ET_SHIFT: u32 = 0;
pub const ART_TAG_ET_MASK: u32 = 0x7 << ART_TAG_ET_SHIFT;
pub const ART_TAG_VLAN_SHIFT: u32 = 3;
pub const ART_TAG_VLAN_MASK: u32 = 0x1f << ART_TAG_VLAN_SHIFT;
pub const ART_TAG_L3_V4_SHIFT: u32 = 8;
pub const ART_TAG_L3_V4_MASK: u32 = 0xf << ART_TAG_L3_V4_SHIFT;
pub const ART_TAG_L3_V6_SHIFT: u32 = 12;
pub const ART_TAG_L3_V6_MASK: u32 = 0xf << ART_TAG_L3_V6_SHIFT;
pub const ART_TAG_L4_SHIFT: u32 = 16;
pub const ART_TAG_L4_MASK: u32 = 0xf << ART_TAG_L4_SHIFT;
pub const ART_TAG_FLEX_SHIFT: u32 = 20;
pub const ART_TAG_FLEX_MASK: u32 = 0x3 << ART_TAG_FLEX_SHIFT;

// Per-category offsets into the action-resolution table, relative to
// the device's base entry.
pub const ART_NTUPLE_USER: u32 = 8;
pub const ART_ETYPE_USER: u32 = 16;
pub const ART_VLAN_USER: u32 = 32;
pub const ART_FLEX_USER: u32 = 48;

/// A filter register.
///
/// The index carried by each variant is the slot index within the
/// category, or the atom index for the generation-2 L3/L4 registers.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Reg {
    VlanFilter(u8),
    VlanTag(u8),
    EtypeFilter(u8),
    EtypeTag(u8),
    NtupleCtrl(u8),
    NtupleSrcAddr(u8),
    NtupleDstAddr(u8),
    NtupleSrcPort(u8),
    NtupleDstPort(u8),
    FlexCtrl(u8),
    FlexTag(u8),
    L3Ctrl(u8),
    L3V4Src(u8),
    L3V4Dst(u8),
    /// Word `w` (0 is least significant) of an IPv6 atom's source.
    L3V6Src(u8, u8),
    L3V6Dst(u8, u8),
    L4Ctrl(u8),
}

impl Reg {
    /// The register's offset in the device's register space.
    pub fn addr(&self) -> u32 {
        match *self {
            Self::VlanFilter(i) => 0x5290 + 4 * i as u32,
            Self::EtypeFilter(i) => 0x5300 + 4 * i as u32,
            Self::NtupleCtrl(i) => 0x5380 + 4 * i as u32,
            Self::NtupleSrcAddr(i) => 0x53B0 + 4 * i as u32,
            Self::NtupleDstAddr(i) => 0x53D0 + 4 * i as u32,
            Self::NtupleSrcPort(i) => 0x5400 + 4 * i as u32,
            Self::NtupleDstPort(i) => 0x5420 + 4 * i as u32,
            Self::FlexCtrl(i) => 0x5460 + 4 * i as u32,
            Self::VlanTag(i) => 0x6400 + 4 * i as u32,
            Self::EtypeTag(i) => 0x6440 + 4 * i as u32,
            Self::FlexTag(i) => 0x6480 + 4 * i as u32,
            Self::L3Ctrl(i) => 0x6500 + 4 * i as u32,
            Self::L3V4Src(i) => 0x6520 + 4 * i as u32,
            Self::L3V4Dst(i) => 0x6540 + 4 * i as u32,
            Self::L3V6Src(i, w) => 0x6600 + 0x10 * i as u32 + 4 * w as u32,
            Self::L3V6Dst(i, w) => 0x6680 + 0x10 * i as u32 + 4 * w as u32,
            Self::L4Ctrl(i) => 0x6700 + 4 * i as u32,
        }
    }
}

impl Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}@{:#06x}", self, self.addr())
    }
}

/// An action-resolution table entry: packets whose tag word matches
/// `tag` under `mask` get `action`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ArtEntry {
    pub tag: u32,
    pub mask: u32,
    pub action: Gen2Action,
}

impl ArtEntry {
    pub const DISABLED: Self =
        Self { tag: 0, mask: 0, action: Gen2Action::DISABLE };
}

/// Access to a device's filter registers.
pub trait RegPort {
    fn read(&self, reg: Reg) -> u32;

    fn write(&mut self, reg: Reg, val: u32);

    /// Write entry `index` of the action-resolution table.
    fn write_art(&mut self, index: u32, entry: ArtEntry);

    /// Enable or disable reception of all VLAN-tagged traffic.
    fn set_vlan_promisc(&mut self, on: bool);
}

/// A register file kept in memory.
///
/// Used by tests and by `rxfadm`'s simulated device. Unwritten
/// registers read as zero.
#[derive(Clone, Debug, Default)]
pub struct MemRegs {
    regs: BTreeMap<Reg, u32>,
    writes: BTreeMap<Reg, u32>,
    art: BTreeMap<u32, ArtEntry>,
    promisc: bool,
}

impl MemRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Reg) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    /// The number of times `reg` has been written.
    pub fn write_count(&self, reg: Reg) -> u32 {
        self.writes.get(&reg).copied().unwrap_or(0)
    }

    pub fn art(&self, index: u32) -> ArtEntry {
        self.art.get(&index).copied().unwrap_or(ArtEntry::DISABLED)
    }

    pub fn vlan_promisc(&self) -> bool {
        self.promisc
    }

    /// Every register holding a non-zero value, in register order.
    pub fn nonzero(&self) -> impl Iterator<Item = (Reg, u32)> + '_ {
        self.regs.iter().filter(|(_, v)| **v != 0).map(|(r, v)| (*r, *v))
    }

    /// Every enabled action-resolution table entry.
    pub fn art_entries(&self) -> impl Iterator<Item = (u32, ArtEntry)> + '_ {
        self.art
            .iter()
            .filter(|(_, e)| e.action != Gen2Action::DISABLE)
            .map(|(i, e)| (*i, *e))
    }
}

impl RegPort for MemRegs {
    fn read(&self, reg: Reg) -> u32 {
        self.get(reg)
    }

    fn write(&mut self, reg: Reg, val: u32) {
        self.regs.insert(reg, val);
        *self.writes.entry(reg).or_insert(0) += 1;
    }

    fn write_art(&mut self, index: u32, entry: ArtEntry) {
        self.art.insert(index, entry);
    }

    fn set_vlan_promisc(&mut self, on: bool) {
        self.promisc = on;
    }
}
