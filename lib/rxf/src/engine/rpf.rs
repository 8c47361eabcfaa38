// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The hardware-generation strategy.
//!
//! The category tables own the slots and decide what each slot holds.
//! How a slot is pushed to the hardware, and which shared tags or
//! atoms it needs to get there, depends on the filter generation. The
//! strategy is picked once at bring-up.

use super::etype::EtypeSlot;
use super::flex::FlexSlot;
use super::location::SlotIdx;
use super::ntuple::NtupleMatch;
use super::ntuple::NtupleSlot;
use super::regs::RegPort;
use super::ring::RingAction;
use super::vlan::VlanSlot;
use crate::api::FilterKind;
use crate::api::Generation;
use crate::api::PoolDump;
use crate::api::RxfError;
use alloc::string::String;
use alloc::vec::Vec;

/// Generation-specific programming of filter slots.
///
/// The `bind_*` methods run before a table commits a new rule. They
/// only change memory and must fail without side effects. The
/// `program_*` methods write the slot's registers, and any shared
/// state the slot leans on, from the final in-memory state; `None`
/// means the slot is disabled.
pub trait Rpf {
    fn generation(&self) -> Generation;

    /// The number of n-tuple slots an IPv6 rule occupies.
    fn v6_span(&self) -> u8 {
        1
    }

    fn program_vlan(
        &self,
        _regs: &mut dyn RegPort,
        _idx: SlotIdx,
        _slot: Option<&VlanSlot>,
    ) {
    }

    fn program_etype(
        &self,
        _regs: &mut dyn RegPort,
        _idx: SlotIdx,
        _slot: Option<&EtypeSlot>,
    ) {
    }

    fn program_flex(
        &self,
        _regs: &mut dyn RegPort,
        _idx: SlotIdx,
        _slot: Option<&FlexSlot>,
    ) {
    }

    fn program_ntuple(
        &mut self,
        regs: &mut dyn RegPort,
        idx: SlotIdx,
        slot: Option<&NtupleSlot>,
    );

    /// Take whatever shared state EtherType slot `idx` needs to carry
    /// `action`, dropping what it held before.
    fn bind_etype(
        &mut self,
        _idx: SlotIdx,
        _action: RingAction,
    ) -> Result<(), RxfError> {
        Ok(())
    }

    fn unbind_etype(&mut self, _idx: SlotIdx) {}

    /// Take whatever shared state n-tuple slot `idx` needs to match
    /// `m`, dropping what it held before.
    fn bind_ntuple(
        &mut self,
        _idx: SlotIdx,
        _m: &NtupleMatch,
    ) -> Result<(), RxfError> {
        Ok(())
    }

    fn unbind_ntuple(&mut self, _idx: SlotIdx) {}

    /// Rewrite shared state held outside the slots, such as live
    /// atoms.
    fn refresh(&self, _regs: &mut dyn RegPort) {}

    fn pools(&self) -> Vec<PoolDump> {
        Vec::new()
    }

    /// A description of the shared state slot `idx` holds.
    fn binding(&self, _kind: FilterKind, _idx: SlotIdx) -> Option<String> {
        None
    }
}
