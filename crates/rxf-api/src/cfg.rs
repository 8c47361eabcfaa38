// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Device configuration supplied at bring-up.

use super::Generation;
use super::cmd::RxfError;
use super::ring::RING_ANY;
use serde::Deserialize;
use serde::Serialize;

/// Number of VLAN filter slots in the hardware.
pub const VLAN_MAX_SLOTS: u32 = 16;
/// Number of EtherType filter slots in the hardware.
pub const ETYPE_MAX_SLOTS: u32 = 16;
/// Number of n-tuple filter slots in the hardware.
pub const NTUPLE_MAX_SLOTS: u32 = 8;
/// Number of flex filter slots in the hardware.
pub const FLEX_MAX_SLOTS: u32 = 2;

/// Largest EtherType tag the tag field can hold.
pub const ETYPE_TAG_MAX: u32 = 7;
/// Number of generation-2 L3 filter registers, shared by the IPv4
/// and IPv6 atom pools.
pub const L3_MAX_ATOMS: u32 = 8;
/// Number of generation-2 L4 filter registers.
pub const L4_MAX_ATOMS: u32 = 8;
/// Number of action-resolution table entries.
pub const ART_ENTRIES: u32 = 128;
/// Entries used by the filter categories, counting from `art_base`.
pub const ART_USER_SPAN: u32 = 64;

/// The configuration of a single device's receive filters.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RxfCfg {
    /// The filter hardware generation.
    pub generation: Generation,
    /// The number of active receive rings.
    pub rx_rings: u32,
    /// Bitmap of rings registered by the forwarding subsystem. A rule
    /// may target these even when they lie beyond `rx_rings`.
    #[serde(default)]
    pub fwd_rings: u32,
    /// Usable VLAN filter slots.
    pub vlan_slots: u32,
    /// Usable EtherType filter slots.
    pub etype_slots: u32,
    /// Highest tag handed out by the EtherType tag-policy pool.
    #[serde(default)]
    pub etype_tag_top: u32,
    /// IPv4 L3 atom pool size.
    #[serde(default)]
    pub l3_v4_atoms: u32,
    /// IPv6 L3 atom pool size.
    #[serde(default)]
    pub l3_v6_atoms: u32,
    /// L4 atom pool size.
    #[serde(default)]
    pub l4_atoms: u32,
    /// First action-resolution table entry owned by this device.
    #[serde(default)]
    pub art_base: u32,
}

impl RxfCfg {
    /// Defaults for the legacy filter hardware.
    pub fn rpf1() -> Self {
        Self {
            generation: Generation::Rpf1,
            rx_rings: 8,
            fwd_rings: 0,
            vlan_slots: VLAN_MAX_SLOTS,
            etype_slots: ETYPE_MAX_SLOTS,
            etype_tag_top: 0,
            l3_v4_atoms: 0,
            l3_v6_atoms: 0,
            l4_atoms: 0,
            art_base: 0,
        }
    }

    /// Defaults for the second-generation filter hardware.
    pub fn rpf2() -> Self {
        Self {
            generation: Generation::Rpf2,
            rx_rings: 8,
            fwd_rings: 0,
            vlan_slots: VLAN_MAX_SLOTS,
            etype_slots: ETYPE_MAX_SLOTS,
            etype_tag_top: ETYPE_TAG_MAX,
            l3_v4_atoms: L3_MAX_ATOMS,
            l3_v6_atoms: L3_MAX_ATOMS,
            l4_atoms: L4_MAX_ATOMS,
            art_base: 0,
        }
    }

    pub fn for_generation(generation: Generation) -> Self {
        match generation {
            Generation::Rpf1 => Self::rpf1(),
            Generation::Rpf2 => Self::rpf2(),
        }
    }

    /// Check that the configuration fits the hardware layout.
    pub fn validate(&self) -> Result<(), RxfError> {
        if self.rx_rings == 0 || self.rx_rings > RING_ANY {
            return Err(RxfError::InvalidCfg(format!(
                "rx_rings must be in 1..={RING_ANY}: {}",
                self.rx_rings
            )));
        }

        if self.vlan_slots > VLAN_MAX_SLOTS {
            return Err(RxfError::InvalidCfg(format!(
                "vlan_slots exceeds {VLAN_MAX_SLOTS}: {}",
                self.vlan_slots
            )));
        }

        if self.etype_slots > ETYPE_MAX_SLOTS {
            return Err(RxfError::InvalidCfg(format!(
                "etype_slots exceeds {ETYPE_MAX_SLOTS}: {}",
                self.etype_slots
            )));
        }

        if self.generation == Generation::Rpf1 {
            return Ok(());
        }

        if self.etype_tag_top == 0 || self.etype_tag_top > ETYPE_TAG_MAX {
            return Err(RxfError::InvalidCfg(format!(
                "etype_tag_top must be in 1..={ETYPE_TAG_MAX}: {}",
                self.etype_tag_top
            )));
        }

        if self.l3_v4_atoms > L3_MAX_ATOMS || self.l3_v6_atoms > L3_MAX_ATOMS
        {
            return Err(RxfError::InvalidCfg(format!(
                "L3 atom pools exceed {L3_MAX_ATOMS}: v4 {} v6 {}",
                self.l3_v4_atoms, self.l3_v6_atoms
            )));
        }

        if self.l4_atoms > L4_MAX_ATOMS {
            return Err(RxfError::InvalidCfg(format!(
                "l4_atoms exceeds {L4_MAX_ATOMS}: {}",
                self.l4_atoms
            )));
        }

        let art_end = self.art_base.checked_add(ART_USER_SPAN);
        if art_end.is_none_or(|end| end > ART_ENTRIES) {
            return Err(RxfError::InvalidCfg(format!(
                "art_base {} leaves no room for {ART_USER_SPAN} entries",
                self.art_base
            )));
        }

        Ok(())
    }
}

impl Default for RxfCfg {
    fn default() -> Self {
        Self::rpf1()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_validate() {
        RxfCfg::rpf1().validate().unwrap();
        RxfCfg::rpf2().validate().unwrap();
    }

    #[test]
    fn oversized_pools_rejected() {
        let cfg = RxfCfg { l4_atoms: L4_MAX_ATOMS + 1, ..RxfCfg::rpf2() };
        assert!(matches!(cfg.validate(), Err(RxfError::InvalidCfg(_))));

        let cfg = RxfCfg { etype_tag_top: 0, ..RxfCfg::rpf2() };
        assert!(matches!(cfg.validate(), Err(RxfError::InvalidCfg(_))));

        let cfg = RxfCfg { rx_rings: 0, ..RxfCfg::rpf1() };
        assert!(matches!(cfg.validate(), Err(RxfError::InvalidCfg(_))));
    }

    #[test]
    fn art_base_out_of_range() {
        for art_base in [ART_ENTRIES - ART_USER_SPAN + 1, u32::MAX] {
            let cfg = RxfCfg { art_base, ..RxfCfg::rpf2() };
            assert!(
                matches!(cfg.validate(), Err(RxfError::InvalidCfg(_))),
                "accepted art_base {art_base}"
            );
        }

        let cfg =
            RxfCfg { art_base: ART_ENTRIES - ART_USER_SPAN, ..RxfCfg::rpf2() };
        cfg.validate().unwrap();
    }
}
