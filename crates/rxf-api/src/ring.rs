// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The ring number meaning "deliver to the host, any ring".
pub const RING_ANY: u32 = 32;

const RING_MASK: u64 = 0x0000_0000_FFFF_FFFF;
const VF_MASK: u64 = 0x0000_00FF_0000_0000;
const VF_SHIFT: u32 = 32;

/// Where matching packets go.
///
/// The cookie is either [`RingCookie::DISCARD`], or a ring number in
/// the low 32 bits with an optional virtual-function qualifier in bits
/// 32..40. This device has a single function, so a non-zero qualifier
/// is rejected when the rule is inserted.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct RingCookie(pub u64);

impl RingCookie {
    pub const DISCARD: Self = Self(u64::MAX);

    pub fn drop() -> Self {
        Self::DISCARD
    }

    pub fn any() -> Self {
        Self(RING_ANY as u64)
    }

    pub fn queue(ring: u32) -> Self {
        Self(ring as u64)
    }

    pub fn with_vf(self, vf: u8) -> Self {
        Self((self.0 & !VF_MASK) | ((vf as u64) << VF_SHIFT))
    }

    pub fn is_discard(&self) -> bool {
        *self == Self::DISCARD
    }

    pub fn ring(&self) -> u32 {
        (self.0 & RING_MASK) as u32
    }

    pub fn vf(&self) -> u8 {
        ((self.0 & VF_MASK) >> VF_SHIFT) as u8
    }
}

impl Display for RingCookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_discard() {
            write!(f, "drop")
        } else if self.ring() == RING_ANY {
            write!(f, "any")
        } else {
            write!(f, "{}", self.ring())
        }
    }
}

impl FromStr for RingCookie {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" | "discard" => Ok(Self::drop()),
            "any" => Ok(Self::any()),
            num => num
                .parse::<u32>()
                .map(Self::queue)
                .map_err(|e| format!("bad ring {s}: {e}")),
        }
    }
}
