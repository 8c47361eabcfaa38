// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! VLAN filters.
//!
//! VLAN slots are driven from two directions: explicit rules from the
//! control plane, and the network stack creating and destroying VLAN
//! subinterfaces. A live subinterface must keep receiving. When it
//! can't get a slot of its own it is counted as promiscuous overflow,
//! and VLAN promiscuous mode stays on for as long as that count is
//! non-zero. Freed slots are handed back to overflow VIDs.

use super::location::CategoryDesc;
use super::location::SlotIdx;
use super::location::VLAN_RXQ;
use super::regs::RXF_EN;
use super::regs::Reg;
use super::regs::VLAN_VID_MASK;
use super::ring::RingAction;
use super::table::FilterCtx;
use super::table::FilterTable;
use super::table::Placement;
use super::table::absent;
use super::table::count_enabled;
use crate::api::EtherSpec;
use crate::api::FlowExt;
use crate::api::FlowRule;
use crate::api::FlowSpec;
use crate::api::Masked;
use crate::api::RuleLocation;
use crate::api::RxfError;
use crate::api::VLAN_MAX_SLOTS;
use crate::provider::LogLevel;
use alloc::vec::Vec;

const VID_COUNT: usize = 4096;
const TCI_PRIO_MASK: u16 = 0xf000;
const TCI_VID_MASK: u16 = 0x0fff;

/// A programmed VLAN filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VlanSlot {
    pub vid: u16,
    pub action: RingAction,
}

impl VlanSlot {
    /// The legacy filter control word.
    pub fn cmd(&self) -> u32 {
        RXF_EN
            | self.action.legacy_bits(VLAN_RXQ)
            | (self.vid as u32 & VLAN_VID_MASK)
    }
}

/// The set of VIDs with a live subinterface.
#[derive(Clone)]
pub struct VidMap {
    bits: [u64; VID_COUNT / 64],
}

impl VidMap {
    pub fn new() -> Self {
        Self { bits: [0; VID_COUNT / 64] }
    }

    fn pos(vid: u16) -> (usize, u64) {
        let vid = (vid & TCI_VID_MASK) as usize;
        (vid / 64, 1 << (vid % 64))
    }

    /// Returns false if `vid` was already present.
    pub fn insert(&mut self, vid: u16) -> bool {
        let (word, bit) = Self::pos(vid);
        let was = self.bits[word] & bit != 0;
        self.bits[word] |= bit;
        !was
    }

    /// Returns false if `vid` wasn't present.
    pub fn remove(&mut self, vid: u16) -> bool {
        let (word, bit) = Self::pos(vid);
        let was = self.bits[word] & bit != 0;
        self.bits[word] &= !bit;
        was
    }

    pub fn contains(&self, vid: u16) -> bool {
        let (word, bit) = Self::pos(vid);
        self.bits[word] & bit != 0
    }

    /// Present VIDs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..VID_COUNT as u16).filter(|vid| self.contains(*vid))
    }
}

impl Default for VidMap {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of a slot search for a VID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VidIdx {
    /// A slot already filters the VID.
    Found(SlotIdx),
    /// The first disabled slot.
    Free(SlotIdx),
    /// A slot that may be taken over: it accepts to the host with no
    /// queue override, for a VID a subinterface would otherwise
    /// receive through promiscuous mode.
    Repl(SlotIdx),
    None,
}

pub struct VlanTable {
    slots: Vec<Option<VlanSlot>>,
    /// Slots usable by this device; the rest belong to other
    /// functions sharing the filter block.
    available: u8,
    vids: VidMap,
    /// Live VIDs that have no slot.
    overflow: u32,
}

impl VlanTable {
    pub fn new(available: u8) -> Self {
        Self {
            slots: vec![None; VLAN_MAX_SLOTS as usize],
            available,
            vids: VidMap::new(),
            overflow: 0,
        }
    }

    pub fn overflow(&self) -> u32 {
        self.overflow
    }

    pub fn promisc(&self) -> bool {
        self.overflow > 0
    }

    pub fn active_vids(&self) -> impl Iterator<Item = u16> + '_ {
        self.vids.iter()
    }

    pub fn slot(&self, idx: SlotIdx) -> Option<&VlanSlot> {
        self.slots.get(idx.index()).and_then(Option::as_ref)
    }

    fn usable(&self) -> impl Iterator<Item = (SlotIdx, &Option<VlanSlot>)> {
        self.slots
            .iter()
            .take(self.available as usize)
            .enumerate()
            .map(|(i, s)| (SlotIdx(i as u8), s))
    }

    /// Search the usable slots for `vid`.
    ///
    /// Passing no VID asks only for the first free slot.
    pub fn find_vid(&self, vid: Option<u16>, try_repl: bool) -> VidIdx {
        let mut free = None;
        let mut repl = None;

        for (idx, slot) in self.usable() {
            let Some(slot) = slot else {
                if free.is_none() {
                    free = Some(idx);
                    if vid.is_none() {
                        break;
                    }
                }
                continue;
            };

            if Some(slot.vid) == vid {
                return VidIdx::Found(idx);
            }

            if try_repl
                && repl.is_none()
                && slot.action == RingAction::Any
                && self.vids.contains(slot.vid)
            {
                repl = Some(idx);
            }
        }

        match (free, repl) {
            (Some(idx), _) => VidIdx::Free(idx),
            (None, Some(idx)) if try_repl => VidIdx::Repl(idx),
            _ => VidIdx::None,
        }
    }

    fn slot_of(&self, vid: u16) -> Option<SlotIdx> {
        self.usable()
            .find(|(_, s)| matches!(s, Some(s) if s.vid == vid))
            .map(|(idx, _)| idx)
    }

    fn dup_vid(&self, idx: SlotIdx, vid: u16) -> Option<SlotIdx> {
        self.slot_of(vid).filter(|dup| *dup != idx)
    }

    /// Live VIDs without a slot, ascending.
    fn waiting(&self) -> Vec<u16> {
        self.vids.iter().filter(|vid| self.slot_of(*vid).is_none()).collect()
    }

    fn parse(rule: &FlowRule) -> Result<u16, RxfError> {
        let FlowSpec::Ether(eth) = &rule.flow else {
            return Err(RxfError::MalformedRule(
                "only ether flow-type supported for VLAN filters".into(),
            ));
        };

        let Some(ext) = &rule.ext else {
            return Err(RxfError::MalformedRule(
                "VLAN filters need the extended flow fields".into(),
            ));
        };

        check_vlan_etype_common(eth, Some(ext))?;
        absent(&eth.ether_type, "ether_type")?;

        let Masked { value, mask } = ext.vlan_tci;
        if mask & TCI_PRIO_MASK != 0 && value & TCI_PRIO_MASK & mask != 0 {
            return Err(RxfError::MalformedRule(
                "VLAN priority can't be matched".into(),
            ));
        }

        if mask & TCI_VID_MASK != TCI_VID_MASK {
            return Err(RxfError::MalformedRule(
                "partial mask on vlan_tci".into(),
            ));
        }

        Ok(value & TCI_VID_MASK)
    }

    /// Store `slot` at `idx` and account for the VIDs gaining or
    /// losing a filter.
    fn install(&mut self, ctx: &mut FilterCtx, idx: SlotIdx, slot: VlanSlot) {
        let old = self.slots[idx.index()];
        let mut delta = 0i32;

        if let Some(old) = old {
            if old.vid != slot.vid && self.vids.contains(old.vid) {
                delta += 1;
            }
        }

        if self.vids.contains(slot.vid) && self.slot_of(slot.vid).is_none() {
            delta -= 1;
        }

        self.slots[idx.index()] = Some(slot);
        self.overflow = self.overflow.saturating_add_signed(delta);
        self.update(ctx, idx);
        self.sync_promisc(ctx);
        self.check_overflow();
    }

    /// Hand free slots to VIDs riding on promiscuous mode, starting
    /// with `idx`. Returns true if `idx` was filled.
    fn pull_from_promisc(&mut self, ctx: &mut FilterCtx, idx: SlotIdx) -> bool {
        if self.overflow == 0 {
            return false;
        }

        let mut waiting = self.waiting().into_iter();
        let mut next = Some(idx);

        while let Some(i) = next {
            let Some(vid) = waiting.next() else {
                break;
            };

            self.slots[i.index()] =
                Some(VlanSlot { vid, action: RingAction::Any });
            self.update(ctx, i);
            self.overflow -= 1;

            if self.overflow == 0 {
                break;
            }

            next = match self.find_vid(None, false) {
                VidIdx::Free(i) => Some(i),
                _ => None,
            };
        }

        self.sync_promisc(ctx);
        self.slots[idx.index()].is_some()
    }

    /// A VLAN subinterface was created.
    pub fn add_vid(&mut self, ctx: &mut FilterCtx, vid: u16) {
        let vid = vid & TCI_VID_MASK;

        if !self.vids.insert(vid) {
            return;
        }

        ctx.log.log(LogLevel::Note, &format!("add vlan id {vid}"));

        match self.find_vid(Some(vid), false) {
            VidIdx::Free(idx) => {
                self.slots[idx.index()] =
                    Some(VlanSlot { vid, action: RingAction::Any });
                self.update(ctx, idx);
            }

            VidIdx::Found(idx) => {
                let slot = &mut self.slots[idx.index()];
                if let Some(s) = slot.as_mut().filter(|s| s.action == RingAction::Drop) {
                    ctx.log.log(
                        LogLevel::Warn,
                        &format!(
                            "overriding VLAN filter for VID {vid} @{} set \
                             to drop",
                            ctx.location(idx)
                        ),
                    );
                    s.action = RingAction::Any;
                    self.update(ctx, idx);
                }
            }

            VidIdx::Repl(_) | VidIdx::None => self.overflow += 1,
        }

        self.sync_promisc(ctx);
        self.check_overflow();
    }

    /// A VLAN subinterface was destroyed.
    pub fn kill_vid(
        &mut self,
        ctx: &mut FilterCtx,
        vid: u16,
    ) -> Result<(), RxfError> {
        let vid = vid & TCI_VID_MASK;

        if !self.vids.remove(vid) {
            return Err(RxfError::UnknownVlan(vid));
        }

        ctx.log.log(LogLevel::Note, &format!("kill vlan id {vid}"));

        match self.find_vid(Some(vid), false) {
            VidIdx::Found(idx) => {
                let queued = matches!(
                    self.slots[idx.index()],
                    Some(VlanSlot { action: RingAction::Queue(_), .. })
                );

                // A queue set through the control plane stays.
                if !queued {
                    self.slots[idx.index()] = None;
                    if !self.pull_from_promisc(ctx, idx) {
                        self.update(ctx, idx);
                    }
                }
            }

            _ => self.overflow = self.overflow.saturating_sub(1),
        }

        self.sync_promisc(ctx);
        self.check_overflow();
        Ok(())
    }

    pub fn sync_promisc(&self, ctx: &mut FilterCtx) {
        ctx.regs.set_vlan_promisc(self.promisc());
    }

    fn check_overflow(&self) {
        debug_assert_eq!(
            self.overflow,
            self.waiting().len() as u32,
            "VLAN overflow count out of step with live VIDs"
        );
    }
}

/// Field checks shared by VLAN and EtherType rules.
pub(super) fn check_vlan_etype_common(
    eth: &EtherSpec,
    ext: Option<&FlowExt>,
) -> Result<(), RxfError> {
    absent(&eth.src, "src_mac")?;
    absent(&eth.dst, "dst_mac")?;

    if let Some(ext) = ext {
        absent(&ext.data, "user_data")?;
        absent(&ext.vlan_etype, "vlan_etype")?;
    }

    Ok(())
}

impl FilterTable for VlanTable {
    fn check(&self, rule: &FlowRule) -> bool {
        Self::parse(rule).is_ok()
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
            flow: FlowSpec::Ether(EtherSpec::default()),
            ext: Some(FlowExt {
                vlan_tci: Masked { value: slot.vid, mask: TCI_VID_MASK },
                ..Default::default()
            }),
            ring_cookie: slot.action.cookie(),
        })
    }

    fn set(
        &mut self,
        ctx: &mut FilterCtx,
        rule: &FlowRule,
        at: Placement,
    ) -> Result<SlotIdx, RxfError> {
        let vid = Self::parse(rule)?;
        let mut action = ctx.rings.validate(rule.ring_cookie)?;

        let idx = match at {
            Placement::At(idx) => {
                if idx.0 >= self.available {
                    return Err(ctx.table_full(Some(idx)));
                }

                if let Some(dup) = self.dup_vid(idx, vid) {
                    return Err(RxfError::DuplicateRule {
                        location: ctx.location(idx),
                        existing: ctx.location(dup),
                        vid,
                    });
                }

                if let Some(old) = self.slot(idx) {
                    if old.vid != vid && self.vids.contains(old.vid) {
                        return Err(RxfError::ConflictingOverride {
                            location: ctx.location(idx),
                            old_vid: old.vid,
                            new_vid: vid,
                        });
                    }
                }

                idx
            }

            Placement::Any => match self.find_vid(Some(vid), true) {
                VidIdx::Found(idx) | VidIdx::Free(idx) | VidIdx::Repl(idx) => {
                    idx
                }
                VidIdx::None => return Err(ctx.table_full(None)),
            },
        };

        // A live subinterface always accepts.
        if self.vids.contains(vid) && action == RingAction::Drop {
            action = RingAction::Any;
        }

        self.install(ctx, idx, VlanSlot { vid, action });
        Ok(idx)
    }

    fn delete(
        &mut self,
        ctx: &mut FilterCtx,
        idx: SlotIdx,
    ) -> Result<(), RxfError> {
        let Some(slot) = self.slot(idx).copied() else {
            return Err(RxfError::InvalidLocation(ctx.location(idx)));
        };

        // The subinterface still needs the filter: only drop the
        // queue override.
        if self.vids.contains(slot.vid) {
            if let RingAction::Queue(_) = slot.action {
                self.slots[idx.index()] =
                    Some(VlanSlot { action: RingAction::Any, ..slot });
            }
            self.update(ctx, idx);
            return Ok(());
        }

        self.slots[idx.index()] = None;
        if !self.pull_from_promisc(ctx, idx) {
            self.update(ctx, idx);
        }

        self.sync_promisc(ctx);
        self.check_overflow();
        Ok(())
    }

    fn update(&self, ctx: &mut FilterCtx, idx: SlotIdx) {
        let slot = self.slot(idx);
        ctx.regs.write(Reg::VlanFilter(idx.0), slot.map_or(0, VlanSlot::cmd));
        ctx.rpf.program_vlan(&mut *ctx.regs, idx, slot);
    }

    fn is_enabled(&self, idx: SlotIdx) -> bool {
        self.slot(idx).is_some()
    }

    fn count(&self) -> u32 {
        count_enabled(&self.slots)
    }
}
