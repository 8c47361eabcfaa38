// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! VLAN subinterface tracking and promiscuous overflow.

use rxf_test_utils as common;

use common::*;

fn vid_in(dev: &TestDev, slot: u8) -> u16 {
    (dev.regs().get(Reg::VlanFilter(slot)) & 0xfff) as u16
}

#[test]
fn add_kill_round_trip() {
    let mut dev = rpf1_dev();

    dev.filters.vlan_add(100);
    assert_eq!(dev.locations(), vec![0]);
    assert_eq!(vid_in(&dev, 0), 100);
    assert_eq!(
        dev.filters.get(0).unwrap(),
        vlan_rule(RuleLocation::At(0), 100, RingCookie::any())
    );

    dev.filters.vlan_kill(100).unwrap();
    assert!(dev.locations().is_empty());
    assert_eq!(dev.regs().get(Reg::VlanFilter(0)), 0);
    assert_eq!(dev.filters.vlan_overflow(), 0);
    assert!(!dev.regs().vlan_promisc());
    assert!(dev.log.contains("kill vlan id 100"));
}

fn vlan_state(dev: &TestDev) -> String {
    let dump = dev.filters.dump();
    let regs: Vec<_> = dev.regs().nonzero().collect();
    format!("{:?} {:?} {regs:?}", dump.slots, dump.vlan)
}

#[test]
fn add_kill_round_trip_with_rules_and_overflow() {
    let mut dev = vlan_dev(4);

    dev.filters
        .insert(&vlan_rule(RuleLocation::At(0), 50, queue(2)))
        .unwrap();
    dev.filters
        .insert(&vlan_rule(RuleLocation::At(1), 60, RingCookie::any()))
        .unwrap();
    dev.filters.vlan_add(10);

    // A free slot is left.
    let start = vlan_state(&dev);
    dev.filters.vlan_add(70);
    assert_eq!(vid_in(&dev, 3), 70);
    dev.filters.vlan_kill(70).unwrap();
    assert_eq!(vlan_state(&dev), start);

    // Fill the table and spill one VID into promiscuous mode.
    dev.filters.vlan_add(20);
    dev.filters.vlan_add(30);
    assert_eq!(dev.filters.vlan_overflow(), 1);
    assert!(dev.regs().vlan_promisc());

    let start = vlan_state(&dev);
    dev.filters.vlan_add(40);
    assert_eq!(dev.filters.vlan_overflow(), 2);
    dev.filters.vlan_kill(40).unwrap();
    assert_eq!(dev.filters.vlan_overflow(), 1);
    assert!(dev.regs().vlan_promisc());
    assert_eq!(vlan_state(&dev), start);
}

#[test]
fn add_is_idempotent() {
    let mut dev = rpf1_dev();
    dev.filters.vlan_add(7);
    dev.filters.vlan_add(7);
    assert_eq!(dev.locations(), vec![0]);
    assert_eq!(dev.filters.dump().vlan.active_vids, vec![7]);
}

#[test]
fn kill_unknown_vid() {
    let mut dev = rpf1_dev();
    assert_rxf_err!(dev.filters.vlan_kill(42), RxfError::UnknownVlan(42));
    assert_eq!(dev.log.count(LogLevel::Error), 1);
}

#[test]
fn overflow_tracks_slotless_vids() {
    let mut dev = vlan_dev(4);

    for vid in 1..=6 {
        dev.filters.vlan_add(vid);
    }

    assert_eq!(dev.filters.vlan_overflow(), 2);
    chk!(dev, dev.regs().vlan_promisc());
    let dump = dev.filters.dump();
    assert!(dump.vlan.promisc);
    assert_eq!(dump.vlan.active_vids, vec![1, 2, 3, 4, 5, 6]);

    // A VID waiting on promiscuous mode just leaves the count.
    dev.filters.vlan_kill(6).unwrap();
    assert_eq!(dev.filters.vlan_overflow(), 1);
    chk!(dev, dev.regs().vlan_promisc());

    dev.filters.vlan_kill(1).unwrap();
    assert_eq!(dev.filters.vlan_overflow(), 0);
    chk!(dev, !dev.regs().vlan_promisc());
    assert_eq!(vid_in(&dev, 0), 5);
}

#[test]
fn eight_slot_overflow_and_reclaim() {
    let mut dev = vlan_dev(8);

    dev.filters.vlan_add(10);
    assert_eq!(vid_in(&dev, 0), 10);

    for vid in 11..=17 {
        dev.filters.vlan_add(vid);
    }
    assert_eq!(dev.filters.count().count, 8);
    assert_eq!(dev.filters.vlan_overflow(), 0);
    chk!(dev, !dev.regs().vlan_promisc());

    dev.filters.vlan_add(19);
    assert_eq!(dev.filters.vlan_overflow(), 1);
    chk!(dev, dev.regs().vlan_promisc());

    dev.filters.vlan_kill(10).unwrap();
    assert_eq!(vid_in(&dev, 0), 19);
    assert_eq!(dev.filters.vlan_overflow(), 0);
    chk!(dev, !dev.regs().vlan_promisc());
}

#[test]
fn unusable_slots_are_left_alone() {
    let mut dev = vlan_dev(2);

    let res = dev.filters.insert(&vlan_rule(RuleLocation::At(2), 5, queue(1)));
    assert_rxf_err!(res, RxfError::TableFull { kind: FilterKind::Vlan, .. });

    dev.filters.vlan_add(1);
    dev.filters.vlan_add(2);
    dev.filters.vlan_add(3);
    assert_eq!(dev.locations(), vec![0, 1]);
    assert_eq!(dev.filters.vlan_overflow(), 1);
}

#[test]
fn control_plane_queue_survives_kill() {
    let mut dev = rpf1_dev();
    dev.filters.vlan_add(30);

    // Steering the live VID to a queue reuses its slot.
    let loc = dev
        .filters
        .insert(&vlan_rule(RuleLocation::Any, 30, queue(2)))
        .unwrap();
    assert_eq!(loc, 0);
    assert_eq!(dev.locations(), vec![0]);

    dev.filters.vlan_kill(30).unwrap();
    assert_eq!(
        dev.filters.get(0).unwrap().ring_cookie,
        queue(2),
        "queue override dropped on kill"
    );

    // With the subinterface gone the rule can be deleted outright.
    dev.filters.delete(0).unwrap();
    assert!(dev.locations().is_empty());
}

#[test]
fn delete_of_live_vid_keeps_filter() {
    let mut dev = rpf1_dev();
    dev.filters.vlan_add(30);
    dev.filters.insert(&vlan_rule(RuleLocation::At(0), 30, queue(4))).unwrap();

    dev.filters.delete(0).unwrap();
    let rule = dev.filters.get(0).unwrap();
    assert_eq!(rule.ring_cookie, RingCookie::any());
    assert_eq!(vid_in(&dev, 0), 30);
}

#[test]
fn live_vid_never_dropped() {
    let mut dev = rpf1_dev();
    dev.filters.vlan_add(12);

    let loc = dev
        .filters
        .insert(&vlan_rule(RuleLocation::Any, 12, RingCookie::drop()))
        .unwrap();
    assert_eq!(dev.filters.get(loc).unwrap().ring_cookie, RingCookie::any());
}

#[test]
fn add_overrides_drop_rule() {
    let mut dev = rpf1_dev();
    dev.filters
        .insert(&vlan_rule(RuleLocation::At(3), 40, RingCookie::drop()))
        .unwrap();

    dev.filters.vlan_add(40);
    assert_eq!(dev.filters.get(3).unwrap().ring_cookie, RingCookie::any());
    assert_eq!(dev.locations(), vec![3]);
    assert!(dev.log.count(LogLevel::Warn) > 0);
}

#[test]
fn duplicate_and_conflicting_vids() {
    let mut dev = rpf1_dev();
    dev.filters.insert(&vlan_rule(RuleLocation::At(0), 50, queue(1))).unwrap();

    let res = dev.filters.insert(&vlan_rule(RuleLocation::At(1), 50, queue(2)));
    assert_rxf_err!(
        res,
        RxfError::DuplicateRule { location: 1, existing: 0, vid: 50 }
    );

    dev.filters.vlan_add(60);
    let res = dev.filters.insert(&vlan_rule(RuleLocation::At(1), 61, queue(2)));
    assert_rxf_err!(
        res,
        RxfError::ConflictingOverride { location: 1, old_vid: 60, new_vid: 61 }
    );
}

#[test]
fn any_placement_takes_over_accepting_slot() {
    let mut dev = vlan_dev(2);
    dev.filters.vlan_add(1);
    dev.filters.vlan_add(2);

    // Both slots accept for a live VID; one of them is handed to the
    // new rule and its VID falls back to promiscuous mode.
    let loc = dev
        .filters
        .insert(&vlan_rule(RuleLocation::Any, 99, queue(3)))
        .unwrap();
    assert_eq!(loc, 0);
    assert_eq!(dev.filters.vlan_overflow(), 1);
    chk!(dev, dev.regs().vlan_promisc());

    // Once the other VID is steered too there is nothing left to
    // take over.
    dev.filters.insert(&vlan_rule(RuleLocation::At(1), 2, queue(1))).unwrap();
    let res = dev.filters.insert(&vlan_rule(RuleLocation::Any, 98, queue(3)));
    assert_rxf_err!(res, RxfError::TableFull { kind: FilterKind::Vlan, .. });
}

#[test]
fn vlan_priority_rejected() {
    let mut dev = rpf1_dev();
    let mut rule = vlan_rule(RuleLocation::At(0), 5, queue(1));
    if let Some(ext) = rule.ext.as_mut() {
        ext.vlan_tci = Masked { value: 0x2005, mask: 0xffff };
    }

    assert_rxf_err!(dev.filters.insert(&rule), RxfError::MalformedRule(_));
}
