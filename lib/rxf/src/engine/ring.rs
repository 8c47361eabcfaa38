// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Ring cookie validation and action encoding.

use super::location::RxqField;
use super::regs::RXF_ACT_TOHOST;
use super::regs::RXF_RXQ_MASK;
use crate::api::RING_ANY;
use crate::api::RingCookie;
use crate::api::RxfError;
use core::fmt;
use core::fmt::Display;

/// What a filter does with the packets it matches.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RingAction {
    Drop,
    /// Deliver to the host, letting RSS pick the ring.
    Any,
    Queue(u8),
}

impl RingAction {
    pub fn cookie(&self) -> RingCookie {
        match self {
            Self::Drop => RingCookie::drop(),
            Self::Any => RingCookie::any(),
            Self::Queue(q) => RingCookie::queue(*q as u32),
        }
    }

    /// Encode into a legacy control word using the category's queue
    /// field.
    pub fn legacy_bits(&self, rxq: RxqField) -> u32 {
        match self {
            Self::Drop => 0,
            Self::Any => RXF_ACT_TOHOST,
            Self::Queue(q) => {
                RXF_ACT_TOHOST
                    | rxq.bit
                    | ((*q as u32 & RXF_RXQ_MASK) << rxq.shift)
            }
        }
    }

    /// Decode the action bits of a legacy control word.
    #[cfg(test)]
    pub fn from_legacy(cmd: u32, rxq: RxqField) -> Self {
        if cmd & rxq.bit != 0 {
            Self::Queue(((cmd >> rxq.shift) & RXF_RXQ_MASK) as u8)
        } else if cmd & RXF_ACT_TOHOST != 0 {
            Self::Any
        } else {
            Self::Drop
        }
    }

    /// The generation-2 resolver action. Default delivery goes to
    /// traffic class 0.
    pub fn gen2(&self) -> Gen2Action {
        match self {
            Self::Drop => Gen2Action::DROP,
            Self::Any => Gen2Action::assign_tc(0),
            Self::Queue(q) => Gen2Action::assign_queue(*q),
        }
    }
}

impl Display for RingAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Any => write!(f, "any"),
            Self::Queue(q) => write!(f, "queue {q}"),
        }
    }
}

/// A generation-2 action-resolution table action word.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Gen2Action(pub u16);

impl Gen2Action {
    const VALID: u16 = 1 << 0;
    const INDEX_SHIFT: u16 = 2;
    const INDEX_MASK: u16 = 0x3f;
    const RSS: u16 = 1 << 7;
    const ACT_SHIFT: u16 = 8;
    const ACT_HOST: u16 = 1;

    pub const DISABLE: Self = Self(0);
    pub const DROP: Self = Self(Self::VALID);

    const fn host(index: u8, rss: bool) -> Self {
        let rss = if rss { Self::RSS } else { 0 };
        Self(
            Self::VALID
                | ((index as u16 & Self::INDEX_MASK) << Self::INDEX_SHIFT)
                | rss
                | (Self::ACT_HOST << Self::ACT_SHIFT),
        )
    }

    pub const fn assign_queue(queue: u8) -> Self {
        Self::host(queue, false)
    }

    pub const fn assign_tc(tc: u8) -> Self {
        Self::host(tc, true)
    }
}

impl Display for Gen2Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let index = (self.0 >> Self::INDEX_SHIFT) & Self::INDEX_MASK;

        if *self == Self::DISABLE {
            write!(f, "disable")
        } else if *self == Self::DROP {
            write!(f, "drop")
        } else if self.0 & Self::RSS != 0 {
            write!(f, "tc {index}")
        } else {
            write!(f, "queue {index}")
        }
    }
}

/// The rings a rule may steer to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RingCfg {
    pub rx_rings: u32,
    /// Rings registered by the forwarding path, as a bitmap.
    pub fwd_rings: u32,
}

impl RingCfg {
    /// Check a ring cookie and turn it into an action.
    pub fn validate(&self, cookie: RingCookie) -> Result<RingAction, RxfError> {
        if cookie.is_discard() {
            return Ok(RingAction::Drop);
        }

        let ring = cookie.ring();
        if !self.ring_ok(ring) {
            return Err(RxfError::QueueOutOfRange(ring));
        }

        if cookie.vf() != 0 {
            return Err(RxfError::QueueReservedFieldSet(cookie.vf()));
        }

        if ring == RING_ANY {
            Ok(RingAction::Any)
        } else {
            Ok(RingAction::Queue(ring as u8))
        }
    }

    fn ring_ok(&self, ring: u32) -> bool {
        if ring > RING_ANY {
            return false;
        }

        if ring < self.rx_rings || ring == RING_ANY {
            return true;
        }

        self.fwd_rings & (1 << ring) != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::location::NTUPLE_RXQ;
    use crate::engine::location::VLAN_RXQ;

    const RINGS: RingCfg = RingCfg { rx_rings: 8, fwd_rings: 1 << 12 };

    #[test]
    fn validate_ring_cookies() {
        assert_eq!(RINGS.validate(RingCookie::DISCARD), Ok(RingAction::Drop));
        assert_eq!(RINGS.validate(RingCookie::any()), Ok(RingAction::Any));
        assert_eq!(RINGS.validate(RingCookie::queue(7)), Ok(RingAction::Queue(7)));
        assert_eq!(
            RINGS.validate(RingCookie::queue(8)),
            Err(RxfError::QueueOutOfRange(8))
        );
        assert_eq!(
            RINGS.validate(RingCookie::queue(12)),
            Ok(RingAction::Queue(12))
        );
        assert_eq!(
            RINGS.validate(RingCookie::queue(33)),
            Err(RxfError::QueueOutOfRange(33))
        );
        assert_eq!(
            RINGS.validate(RingCookie::queue(2).with_vf(1)),
            Err(RxfError::QueueReservedFieldSet(1))
        );
    }

    #[test]
    fn legacy_bits_round_trip() {
        for action in [RingAction::Drop, RingAction::Any, RingAction::Queue(5)]
        {
            for rxq in [VLAN_RXQ, NTUPLE_RXQ] {
                let bits = action.legacy_bits(rxq);
                assert_eq!(RingAction::from_legacy(bits, rxq), action);
            }
        }

        assert_eq!(RingAction::Queue(3).legacy_bits(NTUPLE_RXQ), 0x0021_0300);
    }

    #[test]
    fn gen2_action_words() {
        assert_eq!(Gen2Action::DISABLE.0, 0);
        assert_eq!(Gen2Action::DROP.0, 0x1);
        assert_eq!(Gen2Action::assign_queue(3).0, 0x10D);
        assert_eq!(Gen2Action::assign_tc(0).0, 0x181);
        assert_eq!(RingAction::Any.gen2(), Gen2Action::assign_tc(0));
        assert_eq!(Gen2Action::assign_queue(3).to_string(), "queue 3");
    }
}
