// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Receive filter management.
//!
//! The engine keeps the in-memory state of a NIC's receive
//! classification filters (VLAN, EtherType, n-tuple and flex) and
//! pushes it to the hardware through a [`engine::regs::RegPort`].

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg_attr(feature = "engine", macro_use)]
extern crate alloc;

#[cfg(any(feature = "api", test))]
pub mod api {
    pub use rxf_api::*;
}
#[cfg(any(feature = "engine", test))]
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
#[cfg(any(feature = "engine", test))]
pub mod provider;

/// Return value with `bit` set.
pub const fn bit_on(bit: u8) -> u32 {
    0x1 << bit
}
