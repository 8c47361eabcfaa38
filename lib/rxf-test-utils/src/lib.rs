// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

// Let's make our lives easier and pub use a bunch of stuff.
pub use rxf::api::*;
pub use rxf::engine::RxFilters;
pub use rxf::engine::ioctl::handle_cmd;
pub use rxf::engine::regs::ArtEntry;
pub use rxf::engine::regs::MemRegs;
pub use rxf::engine::regs::Reg;
pub use rxf::engine::ring::Gen2Action;
pub use rxf::print::print_filters;
pub use rxf::print::print_filters_into;
pub use rxf::provider::CaptureLog;
pub use rxf::provider::LogLevel;
pub use rxf::provider::Providers;
pub use std::sync::Arc;

/// A simulated device: its filters plus a handle on everything they
/// logged.
pub struct TestDev {
    pub filters: RxFilters<MemRegs>,
    pub log: Arc<CaptureLog>,
}

impl TestDev {
    pub fn regs(&self) -> &MemRegs {
        self.filters.regs()
    }

    /// The dumped state of the named pool.
    pub fn pool(&self, name: &str) -> PoolDump {
        self.filters
            .dump()
            .pools
            .into_iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("no pool named {name}"))
    }

    /// Usage of the pool entry at `index`, or zero if it's free.
    pub fn pool_usage(&self, name: &str, index: u32) -> u32 {
        self.pool(name)
            .entries
            .iter()
            .find(|e| e.index == index)
            .map_or(0, |e| e.usage)
    }

    pub fn locations(&self) -> Vec<u32> {
        self.filters.list_locations(u32::MAX).unwrap()
    }
}

pub fn dev_setup(cfg: &RxfCfg) -> TestDev {
    let log = Arc::new(CaptureLog::new());
    let providers = Providers { log: Box::new(log.clone()) };
    let filters = RxFilters::new(cfg, MemRegs::new(), providers).unwrap();
    TestDev { filters, log }
}

pub fn rpf1_dev() -> TestDev {
    dev_setup(&RxfCfg::rpf1())
}

pub fn rpf2_dev() -> TestDev {
    dev_setup(&RxfCfg::rpf2())
}

/// A legacy device with only `slots` usable VLAN filters.
pub fn vlan_dev(slots: u32) -> TestDev {
    dev_setup(&RxfCfg { vlan_slots: slots, ..RxfCfg::rpf1() })
}

/// The cookie for "deliver to `q`".
pub fn queue(q: u32) -> RingCookie {
    RingCookie::queue(q)
}

pub fn vlan_rule(loc: RuleLocation, vid: u16, ring: RingCookie) -> FlowRule {
    FlowRule {
        location: loc,
        flow: FlowSpec::Ether(EtherSpec::default()),
        ext: Some(FlowExt {
            vlan_tci: Masked { value: vid, mask: 0x0fff },
            ..Default::default()
        }),
        ring_cookie: ring,
    }
}

pub fn etype_rule(loc: RuleLocation, etype: u16, ring: RingCookie) -> FlowRule {
    FlowRule {
        location: loc,
        flow: FlowSpec::Ether(EtherSpec {
            ether_type: Masked::exact(etype),
            ..Default::default()
        }),
        ext: None,
        ring_cookie: ring,
    }
}

pub fn tcp4_rule(
    loc: RuleLocation,
    dst: Option<&str>,
    dport: Option<u16>,
    ring: RingCookie,
) -> FlowRule {
    FlowRule {
        location: loc,
        flow: FlowSpec::TcpV4(Ipv4L4Spec {
            dst: Masked::from_option(dst.map(|d| d.parse().unwrap())),
            dst_port: Masked::from_option(dport),
            ..Default::default()
        }),
        ext: None,
        ring_cookie: ring,
    }
}

pub fn udp4_rule(
    loc: RuleLocation,
    src: Option<&str>,
    dport: Option<u16>,
    ring: RingCookie,
) -> FlowRule {
    FlowRule {
        location: loc,
        flow: FlowSpec::UdpV4(Ipv4L4Spec {
            src: Masked::from_option(src.map(|s| s.parse().unwrap())),
            dst_port: Masked::from_option(dport),
            ..Default::default()
        }),
        ext: None,
        ring_cookie: ring,
    }
}

pub fn tcp6_rule(
    loc: RuleLocation,
    dst: Option<&str>,
    dport: Option<u16>,
    ring: RingCookie,
) -> FlowRule {
    FlowRule {
        location: loc,
        flow: FlowSpec::TcpV6(Ipv6L4Spec {
            dst: Masked::from_option(dst.map(|d| d.parse().unwrap())),
            dst_port: Masked::from_option(dport),
            ..Default::default()
        }),
        ext: None,
        ring_cookie: ring,
    }
}

pub fn ip4_rule(
    loc: RuleLocation,
    src: Option<&str>,
    proto: Option<u8>,
    ring: RingCookie,
) -> FlowRule {
    FlowRule {
        location: loc,
        flow: FlowSpec::Ip4User(Ipv4UserSpec {
            src: Masked::from_option(src.map(|s| s.parse().unwrap())),
            proto: Masked::from_option(proto),
            ..Default::default()
        }),
        ext: None,
        ring_cookie: ring,
    }
}

/// Like `assert!`, except you also pass in the `TestDev` so that the
/// filter state is printed on failure.
#[macro_export]
macro_rules! chk {
    ($dev:expr, $check:expr) => {
        if !$check {
            $crate::print_filters(&$dev.filters.dump()).unwrap();
            panic!("assertion failed: {}", stringify!($check));
        }
    };
}

/// Assert that an operation failed with an error matching `$pat`.
#[macro_export]
macro_rules! assert_rxf_err {
    ($res:expr, $pat:pat) => {
        match &$res {
            Err($pat) => (),
            other => panic!(
                "expected error {}, but got: {:?}",
                stringify!($pat),
                other
            ),
        }
    };
}

/// Assert that running `$op` leaves the device's registers, rule
/// locations, and pools exactly as they were.
#[macro_export]
macro_rules! assert_no_change {
    ($dev:expr, $op:expr) => {{
        let regs_before: Vec<_> = $dev.regs().nonzero().collect();
        let locs_before = $dev.locations();
        let pools_before = format!("{:?}", $dev.filters.dump().pools);
        let res = $op;
        let regs_after: Vec<_> = $dev.regs().nonzero().collect();
        assert_eq!(regs_before, regs_after, "registers changed");
        assert_eq!(locs_before, $dev.locations(), "rule locations changed");
        assert_eq!(
            pools_before,
            format!("{:?}", $dev.filters.dump().pools),
            "pools changed"
        );
        res
    }};
}
