// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The engine's view of a device configuration.

use super::ring::RingCfg;
use super::rpf::Rpf;
use super::rpf1::Rpf1;
use super::rpf2::Rpf2;
use super::rpf2::Rpf2Layout;
use crate::api::Generation;
use crate::api::RxfCfg;
use crate::api::RxfError;
use alloc::boxed::Box;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RpfLayout {
    Rpf1,
    Rpf2(Rpf2Layout),
}

/// A validated device configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceLayout {
    pub rings: RingCfg,
    pub vlan_slots: u8,
    pub etype_slots: u8,
    pub rpf: RpfLayout,
}

impl DeviceLayout {
    pub fn generation(&self) -> Generation {
        match self.rpf {
            RpfLayout::Rpf1 => Generation::Rpf1,
            RpfLayout::Rpf2(_) => Generation::Rpf2,
        }
    }

    pub fn build_rpf(&self) -> Box<dyn Rpf> {
        match &self.rpf {
            RpfLayout::Rpf1 => Box::new(Rpf1),
            RpfLayout::Rpf2(layout) => Box::new(Rpf2::new(layout)),
        }
    }
}

impl TryFrom<&RxfCfg> for DeviceLayout {
    type Error = RxfError;

    fn try_from(cfg: &RxfCfg) -> Result<Self, Self::Error> {
        cfg.validate()?;

        // Validation bounds every count below well inside a u8.
        let rpf = match cfg.generation {
            Generation::Rpf1 => RpfLayout::Rpf1,
            Generation::Rpf2 => RpfLayout::Rpf2(Rpf2Layout {
                etype_tag_top: cfg.etype_tag_top as u8,
                l3_v4_atoms: cfg.l3_v4_atoms as u8,
                l3_v6_atoms: cfg.l3_v6_atoms as u8,
                l4_atoms: cfg.l4_atoms as u8,
                art_base: cfg.art_base,
            }),
        };

        Ok(Self {
            rings: RingCfg { rx_rings: cfg.rx_rings, fwd_rings: cfg.fwd_rings },
            vlan_slots: cfg.vlan_slots as u8,
            etype_slots: cfg.etype_slots as u8,
            rpf,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generation_picks_strategy() {
        let layout = DeviceLayout::try_from(&RxfCfg::rpf2()).unwrap();
        assert_eq!(layout.build_rpf().generation(), Generation::Rpf2);
        assert_eq!(layout.vlan_slots, 16);

        let layout = DeviceLayout::try_from(&RxfCfg::rpf1()).unwrap();
        assert_eq!(layout.build_rpf().generation(), Generation::Rpf1);
        assert_eq!(layout.build_rpf().v6_span(), 4);
    }

    #[test]
    fn invalid_cfg_rejected() {
        let cfg = RxfCfg { vlan_slots: 17, ..RxfCfg::rpf1() };
        assert!(matches!(
            DeviceLayout::try_from(&cfg),
            Err(RxfError::InvalidCfg(_))
        ));
    }
}
