// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Legacy filter programming.
//!
//! Every category writes its action straight into the slot's control
//! word, which the tables already do. Only the n-tuple address and
//! port registers are left for this strategy.

use super::location::SlotIdx;
use super::ntuple::NtupleAddrs;
use super::ntuple::NtupleSlot;
use super::regs::Reg;
use super::regs::RegPort;
use super::rpf::Rpf;
use crate::api::Generation;

/// Slots spanned by a legacy IPv6 n-tuple filter.
pub const V6_SPAN: u8 = 4;

#[derive(Clone, Copy, Debug, Default)]
pub struct Rpf1;

impl Rpf for Rpf1 {
    fn generation(&self) -> Generation {
        Generation::Rpf1
    }

    fn v6_span(&self) -> u8 {
        V6_SPAN
    }

    fn program_ntuple(
        &mut self,
        regs: &mut dyn RegPort,
        idx: SlotIdx,
        slot: Option<&NtupleSlot>,
    ) {
        let i = idx.0;
        let Some(slot) = slot else {
            regs.write(Reg::NtupleCtrl(i), 0);
            return;
        };

        let m = &slot.m;
        match m.addrs {
            NtupleAddrs::V4 { src, dst } => {
                regs.write(
                    Reg::NtupleSrcAddr(i),
                    src.map_or(0, |ip| ip.to_be_u32()),
                );
                regs.write(
                    Reg::NtupleDstAddr(i),
                    dst.map_or(0, |ip| ip.to_be_u32()),
                );
            }

            // The address spills into the following slots, least
            // significant word first.
            NtupleAddrs::V6 { src, dst } => {
                let src = src.map_or([0; 4], |ip| ip.words());
                let dst = dst.map_or([0; 4], |ip| ip.words());
                for w in 0..V6_SPAN {
                    let word = (V6_SPAN - 1 - w) as usize;
                    regs.write(Reg::NtupleSrcAddr(i + w), src[word]);
                    regs.write(Reg::NtupleDstAddr(i + w), dst[word]);
                }
            }
        }

        regs.write(Reg::NtupleSrcPort(i), m.src_port.unwrap_or(0) as u32);
        regs.write(Reg::NtupleDstPort(i), m.dst_port.unwrap_or(0) as u32);
        regs.write(Reg::NtupleCtrl(i), slot.cmd());
    }
}
