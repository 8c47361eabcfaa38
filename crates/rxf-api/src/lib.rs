// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cfg;
pub mod cmd;
pub mod desc;
pub mod flow;
pub mod ip;
pub mod ring;

pub use cfg::*;
pub use cmd::*;
pub use desc::*;
pub use flow::*;
pub use ip::*;
pub use ring::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment. Currently we attach no
/// semantic meaning to the number other than as a means to verify
/// that the client and the device side are compiled for the same
/// API.
pub const API_VERSION: u64 = 3;

/// The four fixed classes of receive filter the hardware provides.
///
/// The declaration order is the order of the categories in the flat
/// rule-location space.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum FilterKind {
    Vlan,
    Etype,
    Ntuple,
    Flex,
}

impl FilterKind {
    pub const ALL: [FilterKind; 4] =
        [FilterKind::Vlan, FilterKind::Etype, FilterKind::Ntuple, FilterKind::Flex];
}

impl core::str::FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vlan" => Ok(FilterKind::Vlan),
            "etype" | "ethertype" => Ok(FilterKind::Etype),
            "ntuple" => Ok(FilterKind::Ntuple),
            "flex" => Ok(FilterKind::Flex),
            _ => Err(format!("invalid filter kind: {s}")),
        }
    }
}

impl Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FilterKind::Vlan => "VLAN",
            FilterKind::Etype => "ETYPE",
            FilterKind::Ntuple => "NTUPLE",
            FilterKind::Flex => "FLEX",
        };

        write!(f, "{s}")
    }
}

/// The receive packet filter (RPF) generation of the device.
///
/// The legacy generation writes each rule's fields and queue directly
/// into per-slot registers. The second generation matches fields into
/// tags and resolves the final action through a shared
/// action-resolution table.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum Generation {
    #[default]
    Rpf1,
    Rpf2,
}

impl core::str::FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rpf1" | "1" | "legacy" => Ok(Generation::Rpf1),
            "rpf2" | "2" => Ok(Generation::Rpf2),
            _ => Err(format!("invalid rpf generation: {s}")),
        }
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Generation::Rpf1 => "rpf1",
            Generation::Rpf2 => "rpf2",
        };

        write!(f, "{s}")
    }
}
