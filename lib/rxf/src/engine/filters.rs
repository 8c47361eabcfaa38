// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The receive filters of one device.
//!
//! [`RxFilters`] is the only entry point into the engine. It owns the
//! four category tables, the generation strategy, and the register
//! port, and routes each operation to the right table through the
//! location translator. Callers serialize access; nothing in here
//! locks.

use super::cfg::DeviceLayout;
use super::etype::EtypeTable;
use super::flex::FlexTable;
use super::location::CategoryDescs;
use super::location::SlotIdx;
use super::ntuple::NtupleTable;
use super::regs::RegPort;
use super::ring::RingCfg;
use super::rpf::Rpf;
use super::table::FilterCtx;
use super::table::FilterTable;
use super::table::Placement;
use super::vlan::VlanTable;
use crate::api::DumpFiltersResp;
use crate::api::FilterKind;
use crate::api::FlowRule;
use crate::api::Generation;
use crate::api::RuleCountResp;
use crate::api::RuleLocation;
use crate::api::RxfCfg;
use crate::api::RxfError;
use crate::api::SlotDump;
use crate::api::VlanStateDump;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::Providers;
use alloc::boxed::Box;
use alloc::vec::Vec;

pub struct RxFilters<R: RegPort> {
    descs: CategoryDescs,
    vlan: VlanTable,
    etype: EtypeTable,
    ntuple: NtupleTable,
    flex: FlexTable,
    rpf: Box<dyn Rpf>,
    rings: RingCfg,
    regs: R,
    log: Box<dyn LogProvider>,
}

impl<R: RegPort> RxFilters<R> {
    /// Bring up the filters of a device whose registers are reached
    /// through `regs`. Every slot starts disabled and every pool
    /// empty.
    pub fn new(
        cfg: &RxfCfg,
        regs: R,
        providers: Providers,
    ) -> Result<Self, RxfError> {
        let layout = DeviceLayout::try_from(cfg)?;
        let rpf = layout.build_rpf();

        Ok(Self {
            descs: CategoryDescs::new(),
            vlan: VlanTable::new(layout.vlan_slots),
            etype: EtypeTable::new(layout.etype_slots),
            ntuple: NtupleTable::new(rpf.v6_span()),
            flex: FlexTable::new(),
            rpf,
            rings: layout.rings,
            regs,
            log: providers.log,
        })
    }

    pub fn generation(&self) -> Generation {
        self.rpf.generation()
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    fn table(&self, kind: FilterKind) -> &dyn FilterTable {
        match kind {
            FilterKind::Vlan => &self.vlan,
            FilterKind::Etype => &self.etype,
            FilterKind::Ntuple => &self.ntuple,
            FilterKind::Flex => &self.flex,
        }
    }

    /// Borrow the table for `kind` alongside everything else it
    /// needs.
    fn split(&mut self, kind: FilterKind) -> (&mut dyn FilterTable, FilterCtx<'_>) {
        let Self { descs, vlan, etype, ntuple, flex, rpf, rings, regs, log } =
            self;

        let table: &mut dyn FilterTable = match kind {
            FilterKind::Vlan => vlan,
            FilterKind::Etype => etype,
            FilterKind::Ntuple => ntuple,
            FilterKind::Flex => flex,
        };

        let ctx = FilterCtx {
            regs,
            rpf: rpf.as_mut(),
            rings,
            log: &**log,
            desc: descs.get(kind),
        };

        (table, ctx)
    }

    fn split_vlan(&mut self) -> (&mut VlanTable, FilterCtx<'_>) {
        let Self { descs, vlan, rpf, rings, regs, log, .. } = self;

        let ctx = FilterCtx {
            regs,
            rpf: rpf.as_mut(),
            rings,
            log: &**log,
            desc: descs.get(FilterKind::Vlan),
        };

        (vlan, ctx)
    }

    fn log_err<T>(&self, op: &str, res: Result<T, RxfError>) -> Result<T, RxfError> {
        if let Err(e) = &res {
            self.log.log(LogLevel::Error, &format!("{op}: {e}"));
        }
        res
    }

    /// Insert `rule`, returning the location it landed on.
    ///
    /// A rule at [`RuleLocation::Any`] goes to the first category
    /// willing to take it.
    pub fn insert(&mut self, rule: &FlowRule) -> Result<u32, RxfError> {
        let res = self.insert_rule(rule);
        self.log_err(&format!("insert {} rule @{}", rule.flow, rule.location), res)
    }

    fn insert_rule(&mut self, rule: &FlowRule) -> Result<u32, RxfError> {
        let (kind, at) = match rule.location {
            RuleLocation::At(loc) => {
                let (kind, idx) = self.descs.resolve(loc)?;
                (kind, Placement::At(idx))
            }

            RuleLocation::Any => {
                let kind = FilterKind::ALL
                    .into_iter()
                    .find(|kind| self.table(*kind).check(rule))
                    .ok_or_else(|| {
                        RxfError::MalformedRule(format!(
                            "no filter category takes {} rules at any \
                             location",
                            rule.flow
                        ))
                    })?;
                (kind, Placement::Any)
            }
        };

        let (table, mut ctx) = self.split(kind);
        let idx = table.set(&mut ctx, rule, at)?;
        Ok(self.descs.location(kind, idx))
    }

    pub fn delete(&mut self, location: u32) -> Result<(), RxfError> {
        let res = self.descs.resolve(location).and_then(|(kind, idx)| {
            let (table, mut ctx) = self.split(kind);
            table.delete(&mut ctx, idx)
        });
        self.log_err(&format!("delete rule @{location}"), res)
    }

    pub fn get(&self, location: u32) -> Result<FlowRule, RxfError> {
        let (kind, idx) = self.descs.resolve(location)?;
        self.table(kind).get(self.descs.get(kind), idx)
    }

    fn enabled(&self) -> impl Iterator<Item = (FilterKind, SlotIdx)> + '_ {
        self.descs.iter().flat_map(move |desc| {
            desc.slots()
                .filter(move |idx| self.table(desc.kind).is_enabled(*idx))
                .map(move |idx| (desc.kind, idx))
        })
    }

    /// Every enabled location, ascending. Fails if there are more
    /// than `capacity`.
    pub fn list_locations(&self, capacity: u32) -> Result<Vec<u32>, RxfError> {
        let count = self.count().count;
        if capacity < count {
            return Err(RxfError::CapacityTooSmall {
                needed: count,
                given: capacity,
            });
        }

        Ok(self
            .enabled()
            .map(|(kind, idx)| self.descs.location(kind, idx))
            .collect())
    }

    pub fn count(&self) -> RuleCountResp {
        RuleCountResp {
            count: FilterKind::ALL.iter().map(|k| self.table(*k).count()).sum(),
            max: self.descs.total_max(),
            special_locations: true,
        }
    }

    pub fn rx_rings(&self) -> u32 {
        self.rings.rx_rings
    }

    /// A VLAN subinterface for `vid` was created.
    pub fn vlan_add(&mut self, vid: u16) {
        let (vlan, mut ctx) = self.split_vlan();
        vlan.add_vid(&mut ctx, vid);
    }

    /// The VLAN subinterface for `vid` was destroyed.
    pub fn vlan_kill(&mut self, vid: u16) -> Result<(), RxfError> {
        let (vlan, mut ctx) = self.split_vlan();
        let res = vlan.kill_vid(&mut ctx, vid);
        self.log_err(&format!("kill vlan {vid}"), res)
    }

    pub fn vlan_overflow(&self) -> u32 {
        self.vlan.overflow()
    }

    /// Take the last slot of `kind` away from rule placement, for use
    /// by the forwarding path. Returns the slot index.
    pub fn reserve(&mut self, kind: FilterKind) -> Result<u32, RxfError> {
        let res = self.reserve_slot(kind);
        self.log_err(&format!("reserve {kind} filter"), res)
    }

    fn reserve_slot(&mut self, kind: FilterKind) -> Result<u32, RxfError> {
        let desc = self.descs.get(kind);

        if !desc.is_reserved() && desc.max() > 0 {
            let last = SlotIdx((desc.max() - 1) as u8);
            if self.table(kind).is_occupied(last) {
                return Err(RxfError::BadState(format!(
                    "{kind} slot {last} is in use"
                )));
            }
        }

        self.descs.reserve(kind).map(|idx| idx.0 as u32)
    }

    pub fn release(&mut self, kind: FilterKind) -> Result<(), RxfError> {
        let res = self.descs.release(kind);
        self.log_err(&format!("release {kind} filter"), res)
    }

    /// Rewrite every filter register from memory, as needed after a
    /// device reset. Reference counts are left alone.
    pub fn refresh(&mut self) {
        self.rpf.refresh(&mut self.regs);

        for kind in FilterKind::ALL {
            let slots = self.descs.get(kind).slots();
            let (table, mut ctx) = self.split(kind);
            for idx in slots {
                table.update(&mut ctx, idx);
            }
        }

        let (vlan, mut ctx) = self.split_vlan();
        vlan.sync_promisc(&mut ctx);
    }

    pub fn dump(&self) -> DumpFiltersResp {
        let slots = self
            .enabled()
            .filter_map(|(kind, idx)| {
                let rule = self.table(kind).get(self.descs.get(kind), idx).ok()?;
                Some(SlotDump {
                    kind,
                    index: idx.0 as u32,
                    rule,
                    binding: self.rpf.binding(kind, idx),
                })
            })
            .collect();

        DumpFiltersResp {
            generation: self.generation(),
            slots,
            pools: self.rpf.pools(),
            vlan: VlanStateDump {
                active_vids: self.vlan.active_vids().collect(),
                overflow: self.vlan.overflow(),
                promisc: self.vlan.promisc(),
            },
        }
    }
}
