// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! EtherType filters.

use super::location::CategoryDesc;
use super::location::ETYPE_RXQ;
use super::location::SlotIdx;
use super::regs::ETYPE_VAL_MASK;
use super::regs::RXF_EN;
use super::regs::Reg;
use super::ring::RingAction;
use super::table::FilterCtx;
use super::table::FilterTable;
use super::table::Placement;
use super::table::count_enabled;
use super::table::first_free;
use super::vlan::check_vlan_etype_common;
use crate::api::ETYPE_MAX_SLOTS;
use crate::api::EtherSpec;
use crate::api::FlowRule;
use crate::api::FlowSpec;
use crate::api::Masked;
use crate::api::RuleLocation;
use crate::api::RxfError;
use alloc::vec::Vec;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EtypeSlot {
    pub ether_type: u16,
    pub action: RingAction,
}

impl EtypeSlot {
    pub fn cmd(&self) -> u32 {
        RXF_EN
            | self.action.legacy_bits(ETYPE_RXQ)
            | (self.ether_type as u32 & ETYPE_VAL_MASK)
    }
}

pub struct EtypeTable {
    slots: Vec<Option<EtypeSlot>>,
    available: u8,
}

impl EtypeTable {
    pub fn new(available: u8) -> Self {
        Self { slots: vec![None; ETYPE_MAX_SLOTS as usize], available }
    }

    pub fn slot(&self, idx: SlotIdx) -> Option<&EtypeSlot> {
        self.slots.get(idx.index()).and_then(Option::as_ref)
    }

    fn parse(rule: &FlowRule) -> Result<u16, RxfError> {
        let FlowSpec::Ether(eth) = &rule.flow else {
            return Err(RxfError::MalformedRule(
                "only ether flow-type supported for EtherType filters".into(),
            ));
        };

        if let Some(ext) = &rule.ext {
            if !ext.vlan_tci.is_wildcard() {
                return Err(RxfError::MalformedRule(
                    "EtherType filters can't match a VLAN tag".into(),
                ));
            }
        }

        check_vlan_etype_common(eth, rule.ext.as_ref())?;

        match eth.ether_type.binary() {
            Ok(Some(ether_type)) => Ok(ether_type),
            _ => Err(RxfError::MalformedRule(
                "EtherType filters need an exact ether_type".into(),
            )),
        }
    }
}

impl FilterTable for EtypeTable {
    fn get(
        &self,
        desc: &CategoryDesc,
        idx: SlotIdx,
    ) -> Result<FlowRule, RxfError> {
        let location = desc.location(idx);
        let slot = self.slot(idx).ok_or(RxfError::RuleNotFound(location))?;

        Ok(FlowRule {
            location: RuleLocation::At(location),
            flow: FlowSpec::Ether(EtherSpec {
                ether_type: Masked::exact(slot.ether_type),
                ..Default::default()
            }),
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
        let ether_type = Self::parse(rule)?;
        let action = ctx.rings.validate(rule.ring_cookie)?;
        let limit = ctx.desc.max().min(self.available as u32);

        let idx = match at {
            Placement::At(idx) if (idx.0 as u32) < limit => idx,
            Placement::At(idx) => return Err(ctx.table_full(Some(idx))),
            Placement::Any => first_free(&self.slots, limit)
                .ok_or_else(|| ctx.table_full(None))?,
        };

        ctx.rpf.bind_etype(idx, action)?;
        self.slots[idx.index()] = Some(EtypeSlot { ether_type, action });
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
        ctx.rpf.unbind_etype(idx);
        self.update(ctx, idx);
        Ok(())
    }

    fn update(&self, ctx: &mut FilterCtx, idx: SlotIdx) {
        let slot = self.slot(idx);
        ctx.regs
            .write(Reg::EtypeFilter(idx.0), slot.map_or(0, EtypeSlot::cmd));
        ctx.rpf.program_etype(&mut *ctx.regs, idx, slot);
    }

    fn is_enabled(&self, idx: SlotIdx) -> bool {
        self.slot(idx).is_some()
    }

    fn count(&self) -> u32 {
        count_enabled(&self.slots)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::FlowExt;
    use crate::api::MacAddr;
    use crate::api::RingCookie;

    fn etype_rule(ether_type: u16) -> FlowRule {
        FlowRule {
            location: RuleLocation::At(16),
            flow: FlowSpec::Ether(EtherSpec {
                ether_type: Masked::exact(ether_type),
                ..Default::default()
            }),
            ext: None,
            ring_cookie: RingCookie::queue(1),
        }
    }

    #[test]
    fn parse_ether_type() {
        assert_eq!(EtypeTable::parse(&etype_rule(0x88F7)), Ok(0x88F7));

        let mut rule = etype_rule(0x88F7);
        rule.flow = FlowSpec::Ether(EtherSpec {
            ether_type: Masked { value: 0x88F7, mask: 0xFF00 },
            ..Default::default()
        });
        assert!(EtypeTable::parse(&rule).is_err());

        let mut rule = etype_rule(0x88F7);
        rule.ext = Some(FlowExt {
            vlan_tci: Masked::exact(10),
            ..Default::default()
        });
        assert!(EtypeTable::parse(&rule).is_err());

        let mut rule = etype_rule(0x88F7);
        rule.flow = FlowSpec::Ether(EtherSpec {
            ether_type: Masked::exact(0x88F7),
            dst: Masked::exact(MacAddr::BROADCAST),
            ..Default::default()
        });
        assert!(EtypeTable::parse(&rule).is_err());
    }

    #[test]
    fn legacy_cmd() {
        let slot =
            EtypeSlot { ether_type: 0x88F7, action: RingAction::Queue(2) };
        assert_eq!(slot.cmd(), 0xA021_88F7);

        let slot = EtypeSlot { ether_type: 0x0806, action: RingAction::Drop };
        assert_eq!(slot.cmd(), 0x8000_0806);
    }
}
