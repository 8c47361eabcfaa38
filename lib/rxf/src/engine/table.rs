// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The interface shared by the four filter categories.

use super::location::CategoryDesc;
use super::location::SlotIdx;
use super::regs::RegPort;
use super::ring::RingCfg;
use super::rpf::Rpf;
use crate::api::FlowRule;
use crate::api::MaskField;
use crate::api::Masked;
use crate::api::RxfError;
use crate::provider::LogProvider;

/// Everything a table needs besides its own slots while it handles
/// one operation.
pub struct FilterCtx<'a> {
    pub regs: &'a mut dyn RegPort,
    pub rpf: &'a mut dyn Rpf,
    pub rings: &'a RingCfg,
    pub log: &'a dyn LogProvider,
    pub desc: &'a CategoryDesc,
}

impl FilterCtx<'_> {
    pub fn location(&self, idx: SlotIdx) -> u32 {
        self.desc.location(idx)
    }

    pub fn table_full(&self, idx: Option<SlotIdx>) -> RxfError {
        let location = match idx {
            Some(idx) => self.location(idx),
            None => self.desc.base,
        };

        RxfError::TableFull { kind: self.desc.kind, location }
    }
}

/// Where in its category a rule should go.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    At(SlotIdx),
    /// The table picks the slot.
    Any,
}

/// One category of receive filter.
///
/// Tables keep their slots in memory and push a slot to the hardware
/// only after the in-memory state is final. Every method that fails
/// does so before any slot, pool, or register has changed.
pub trait FilterTable {
    /// Can this table take `rule` when the caller leaves the location
    /// to the device?
    fn check(&self, _rule: &FlowRule) -> bool {
        false
    }

    /// Rebuild the rule held in slot `idx`.
    fn get(&self, desc: &CategoryDesc, idx: SlotIdx)
    -> Result<FlowRule, RxfError>;

    /// Install `rule`, returning the slot it landed in.
    fn set(
        &mut self,
        ctx: &mut FilterCtx,
        rule: &FlowRule,
        at: Placement,
    ) -> Result<SlotIdx, RxfError>;

    fn delete(
        &mut self,
        ctx: &mut FilterCtx,
        idx: SlotIdx,
    ) -> Result<(), RxfError>;

    /// Write slot `idx` to the hardware from memory.
    fn update(&self, ctx: &mut FilterCtx, idx: SlotIdx);

    fn is_enabled(&self, idx: SlotIdx) -> bool;

    /// Is the slot unavailable for a new rule? This differs from
    /// [`Self::is_enabled`] when another rule spills into the slot.
    fn is_occupied(&self, idx: SlotIdx) -> bool {
        self.is_enabled(idx)
    }

    /// The number of enabled slots.
    fn count(&self) -> u32;
}

/// The index of the first empty slot below `limit`.
pub fn first_free<T>(slots: &[Option<T>], limit: u32) -> Option<SlotIdx> {
    slots
        .iter()
        .take(limit as usize)
        .position(Option::is_none)
        .map(|i| SlotIdx(i as u8))
}

pub fn count_enabled<T>(slots: &[Option<T>]) -> u32 {
    slots.iter().filter(|s| s.is_some()).count() as u32
}

/// Require a field the hardware can't match to be left out.
pub fn absent<T: MaskField>(
    field: &Masked<T>,
    name: &str,
) -> Result<(), RxfError> {
    if field.is_wildcard() {
        Ok(())
    } else {
        Err(RxfError::MalformedRule(format!("unsupported match field {name}")))
    }
}

/// An exact-or-absent field.
pub fn binary<T: MaskField>(
    field: &Masked<T>,
    name: &str,
) -> Result<Option<T>, RxfError> {
    field.binary().map_err(|_| {
        RxfError::MalformedRule(format!("partial mask on {name}"))
    })
}
