// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The receive filter engine.
//!
//! All code under this namespace is guarded by the `engine` feature flag.
pub mod cfg;
pub mod etype;
pub mod filters;
pub mod flex;
pub mod ioctl;
pub mod location;
pub mod ntuple;
pub mod pool;
pub mod regs;
pub mod ring;
pub mod rpf;
pub mod rpf1;
pub mod rpf2;
pub mod table;
pub mod vlan;

pub use filters::RxFilters;
