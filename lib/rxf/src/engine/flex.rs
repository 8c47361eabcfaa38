// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flex filters. The match pattern is programmed out of band; only
//! the enable and the action are managed here.

use super::location::CategoryDesc;
use super::location::FLEX_RXQ;
use super::location::SlotIdx;
use super::regs::RXF_EN;
use super::regs::Reg;
use super::ring::RingAction;
use super::table::FilterCtx;
use super::table::FilterTable;
use super::table::Placement;
use super::table::count_enabled;
use super::table::first_free;
use crate::api::FLEX_MAX_SLOTS;
use crate::api::FlowRule;
use crate::api::FlowSpec;
use crate::api::RuleLocation;
use crate::api::RxfError;
use alloc::vec::Vec;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlexSlot {
    pub action: RingAction,
}

impl FlexSlot {
    pub fn cmd(&self) -> u32 {
        RXF_EN | self.action.legacy_bits(FLEX_RXQ)
    }
}

pub struct FlexTable {
    slots: Vec<Option<FlexSlot>>,
}

impl FlexTable {
    pub fn new() -> Self {
        Self { slots: vec![None; FLEX_MAX_SLOTS as usize] }
    }

    pub fn slot(&self, idx: SlotIdx) -> Option<&FlexSlot> {
        self.slots.get(idx.index()).and_then(Option::as_ref)
    }
}

impl Default for FlexTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterTable for FlexTable {
    fn get(
        &self,
        desc: &CategoryDesc,
        idx: SlotIdx,
    ) -> Result<FlowRule, RxfError> {
        let location = desc.location(idx);
        let slot = self.slot(idx).ok_or(RxfError::RuleNotFound(location))?;

        Ok(FlowRule {
            location: RuleLocation::At(location),
            flow: FlowSpec::default(),
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
        let action = ctx.rings.validate(rule.ring_cookie)?;

        let idx = match at {
            Placement::At(idx) => idx,
            Placement::Any => first_free(&self.slots, ctx.desc.max())
                .ok_or_else(|| ctx.table_full(None))?,
        };

        self.slots[idx.index()] = Some(FlexSlot { action });
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
        self.update(ctx, idx);
        Ok(())
    }

    fn update(&self, ctx: &mut FilterCtx, idx: SlotIdx) {
        let slot = self.slot(idx);
        ctx.regs.write(Reg::FlexCtrl(idx.0), slot.map_or(0, FlexSlot::cmd));
        ctx.rpf.program_flex(&mut *ctx.regs, idx, slot);
    }

    fn is_enabled(&self, idx: SlotIdx) -> bool {
        self.slot(idx).is_some()
    }

    fn count(&self) -> u32 {
        count_enabled(&self.slots)
    }
}
