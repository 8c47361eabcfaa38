// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Category descriptors and rule-location translation.
//!
//! Callers address rules by a single flat location number. The four
//! categories are laid out back to back in that space, in
//! [`FilterKind`] order, and this module is the only place that does
//! base arithmetic on it.

use crate::api::ETYPE_MAX_SLOTS;
use crate::api::FLEX_MAX_SLOTS;
use crate::api::FilterKind;
use crate::api::NTUPLE_MAX_SLOTS;
use crate::api::RxfError;
use crate::api::VLAN_MAX_SLOTS;
use crate::bit_on;
use core::fmt;
use core::fmt::Display;

pub const VLAN_BASE: u32 = 0;
pub const ETYPE_BASE: u32 = VLAN_BASE + VLAN_MAX_SLOTS;
pub const NTUPLE_BASE: u32 = ETYPE_BASE + ETYPE_MAX_SLOTS;
pub const FLEX_BASE: u32 = NTUPLE_BASE + NTUPLE_MAX_SLOTS;

/// Where a category's legacy control word carries the queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RxqField {
    /// Set when a specific queue is assigned.
    pub bit: u32,
    /// Position of the queue number.
    pub shift: u32,
}

pub const VLAN_RXQ: RxqField = RxqField { bit: bit_on(28), shift: 20 };
pub const ETYPE_RXQ: RxqField = RxqField { bit: bit_on(29), shift: 20 };
pub const NTUPLE_RXQ: RxqField = RxqField { bit: bit_on(21), shift: 8 };
pub const FLEX_RXQ: RxqField = RxqField { bit: bit_on(30), shift: 8 };

/// A slot index within one category.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SlotIdx(pub u8);

impl SlotIdx {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for SlotIdx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct CategoryDesc {
    pub kind: FilterKind,
    pub base: u32,
    /// Slots currently addressable. One less than `hw_max` while a
    /// slot is reserved for the forwarding path.
    max: u32,
    pub hw_max: u32,
    pub rxq: RxqField,
}

impl CategoryDesc {
    const fn new(
        kind: FilterKind,
        base: u32,
        hw_max: u32,
        rxq: RxqField,
    ) -> Self {
        Self { kind, base, max: hw_max, hw_max, rxq }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_reserved(&self) -> bool {
        self.max != self.hw_max
    }

    pub fn location(&self, idx: SlotIdx) -> u32 {
        self.base + idx.0 as u32
    }

    /// Slot indexes `0..max`.
    pub fn slots(&self) -> impl Iterator<Item = SlotIdx> + use<> {
        (0..self.max as u8).map(SlotIdx)
    }
}

/// The fixed table of filter categories.
#[derive(Clone, Debug)]
pub struct CategoryDescs {
    descs: [CategoryDesc; 4],
}

impl CategoryDescs {
    pub fn new() -> Self {
        Self {
            descs: [
                CategoryDesc::new(
                    FilterKind::Vlan,
                    VLAN_BASE,
                    VLAN_MAX_SLOTS,
                    VLAN_RXQ,
                ),
                CategoryDesc::new(
                    FilterKind::Etype,
                    ETYPE_BASE,
                    ETYPE_MAX_SLOTS,
                    ETYPE_RXQ,
                ),
                CategoryDesc::new(
                    FilterKind::Ntuple,
                    NTUPLE_BASE,
                    NTUPLE_MAX_SLOTS,
                    NTUPLE_RXQ,
                ),
                CategoryDesc::new(
                    FilterKind::Flex,
                    FLEX_BASE,
                    FLEX_MAX_SLOTS,
                    FLEX_RXQ,
                ),
            ],
        }
    }

    fn pos(kind: FilterKind) -> usize {
        match kind {
            FilterKind::Vlan => 0,
            FilterKind::Etype => 1,
            FilterKind::Ntuple => 2,
            FilterKind::Flex => 3,
        }
    }

    pub fn get(&self, kind: FilterKind) -> &CategoryDesc {
        &self.descs[Self::pos(kind)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryDesc> {
        self.descs.iter()
    }

    /// Translate a flat location into its category and slot.
    ///
    /// Categories are contiguous, so a location below the next
    /// category's base that missed the previous one (a reserved slot)
    /// names nothing.
    pub fn resolve(
        &self,
        loc: u32,
    ) -> Result<(FilterKind, SlotIdx), RxfError> {
        for desc in &self.descs {
            if loc < desc.base {
                break;
            }

            if loc < desc.base + desc.max {
                return Ok((desc.kind, SlotIdx((loc - desc.base) as u8)));
            }
        }

        Err(RxfError::InvalidLocation(loc))
    }

    pub fn location(&self, kind: FilterKind, idx: SlotIdx) -> u32 {
        self.get(kind).location(idx)
    }

    /// Total addressable slots across every category.
    pub fn total_max(&self) -> u32 {
        self.descs.iter().map(|d| d.max).sum()
    }

    /// Take the last slot of `kind` out of the location space and
    /// return its index.
    pub fn reserve(&mut self, kind: FilterKind) -> Result<SlotIdx, RxfError> {
        Self::check_reservable(kind)?;
        let desc = &mut self.descs[Self::pos(kind)];

        if desc.is_reserved() {
            return Err(RxfError::BadState(format!(
                "{kind} filter already reserved"
            )));
        }

        desc.max -= 1;
        Ok(SlotIdx(desc.max as u8))
    }

    /// Return a slot taken by [`Self::reserve`].
    pub fn release(&mut self, kind: FilterKind) -> Result<(), RxfError> {
        Self::check_reservable(kind)?;
        let desc = &mut self.descs[Self::pos(kind)];

        if !desc.is_reserved() {
            return Err(RxfError::BadState(format!(
                "{kind} filter released without reservation"
            )));
        }

        desc.max += 1;
        Ok(())
    }

    fn check_reservable(kind: FilterKind) -> Result<(), RxfError> {
        match kind {
            FilterKind::Etype | FilterKind::Ntuple => Ok(()),
            _ => Err(RxfError::BadState(format!(
                "{kind} filters can't be reserved"
            ))),
        }
    }
}

impl Default for CategoryDescs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_bases() {
        let descs = CategoryDescs::new();
        assert_eq!(descs.resolve(0), Ok((FilterKind::Vlan, SlotIdx(0))));
        assert_eq!(descs.resolve(15), Ok((FilterKind::Vlan, SlotIdx(15))));
        assert_eq!(descs.resolve(16), Ok((FilterKind::Etype, SlotIdx(0))));
        assert_eq!(descs.resolve(37), Ok((FilterKind::Ntuple, SlotIdx(5))));
        assert_eq!(descs.resolve(41), Ok((FilterKind::Flex, SlotIdx(1))));
        assert_eq!(descs.resolve(42), Err(RxfError::InvalidLocation(42)));
        assert_eq!(descs.total_max(), 42);
    }

    #[test]
    fn reserved_slot_unaddressable() {
        let mut descs = CategoryDescs::new();
        assert_eq!(descs.reserve(FilterKind::Ntuple), Ok(SlotIdx(7)));
        assert_eq!(descs.resolve(39), Err(RxfError::InvalidLocation(39)));
        assert_eq!(descs.resolve(40), Ok((FilterKind::Flex, SlotIdx(0))));
        assert_eq!(descs.total_max(), 41);

        assert!(matches!(
            descs.reserve(FilterKind::Ntuple),
            Err(RxfError::BadState(_))
        ));

        descs.release(FilterKind::Ntuple).unwrap();
        assert_eq!(descs.resolve(39), Ok((FilterKind::Ntuple, SlotIdx(7))));
        assert!(matches!(
            descs.release(FilterKind::Ntuple),
            Err(RxfError::BadState(_))
        ));
    }

    #[test]
    fn only_etype_and_ntuple_reservable() {
        let mut descs = CategoryDescs::new();
        assert!(descs.reserve(FilterKind::Vlan).is_err());
        assert!(descs.reserve(FilterKind::Flex).is_err());
        assert_eq!(descs.reserve(FilterKind::Etype), Ok(SlotIdx(15)));
    }
}
