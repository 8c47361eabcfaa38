// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Second-generation filters: shared L3/L4 atoms, EtherType action
//! tags, and the action-resolution table.

use rxf::engine::regs::ART_ETYPE_USER;
use rxf::engine::regs::ART_NTUPLE_USER;
use rxf::engine::regs::ART_TAG_ET_MASK;
use rxf::engine::regs::ART_TAG_L3_V4_MASK;
use rxf::engine::regs::ART_TAG_L4_MASK;
use rxf::engine::regs::ART_TAG_VLAN_MASK;
use rxf::engine::regs::ART_VLAN_USER;
use rxf_test_utils as common;

use common::*;

#[test]
fn l3_atom_shared_by_equal_rules() {
    let mut dev = rpf2_dev();

    let http = tcp4_rule(RuleLocation::At(32), Some("10.0.0.1"), Some(80), queue(1));
    let https = tcp4_rule(RuleLocation::At(33), Some("10.0.0.1"), Some(443), queue(1));
    dev.filters.insert(&http).unwrap();
    dev.filters.insert(&https).unwrap();

    chk!(dev, dev.pool_usage("l3-v4", 0) == 2);
    assert_eq!(dev.pool("l3-v4").entries.len(), 1);
    assert_eq!(dev.pool("l3-v4").entries[0].key, "dst=10.0.0.1 proto=6");
    assert_eq!(dev.regs().write_count(Reg::L3Ctrl(0)), 1);
    assert_eq!(dev.pool_usage("l4", 0), 1);
    assert_eq!(dev.pool_usage("l4", 1), 1);

    dev.filters.delete(32).unwrap();
    chk!(dev, dev.pool_usage("l3-v4", 0) == 1);
    assert_eq!(dev.regs().write_count(Reg::L3Ctrl(0)), 1);
    assert_ne!(dev.regs().get(Reg::L3Ctrl(0)), 0);
    assert_eq!(dev.regs().get(Reg::L4Ctrl(0)), 0);

    dev.filters.delete(33).unwrap();
    chk!(dev, dev.pool("l3-v4").entries.is_empty());
    assert_eq!(dev.regs().get(Reg::L3Ctrl(0)), 0);
    assert_eq!(dev.regs().get(Reg::L3V4Dst(0)), 0);
    assert!(dev.pool("l4").entries.is_empty());
}

#[test]
fn ntuple_art_entry() {
    let mut dev = rpf2_dev();

    let rule = tcp4_rule(RuleLocation::At(32), Some("10.0.0.1"), Some(80), queue(3));
    dev.filters.insert(&rule).unwrap();
    assert_eq!(
        dev.regs().art(ART_NTUPLE_USER),
        ArtEntry {
            tag: (1 << 8) | (1 << 16),
            mask: ART_TAG_L3_V4_MASK | ART_TAG_L4_MASK,
            action: Gen2Action::assign_queue(3),
        }
    );

    // No ports means no L4 atom.
    let rule = ip4_rule(RuleLocation::At(33), Some("10.0.0.2"), None, RingCookie::drop());
    dev.filters.insert(&rule).unwrap();
    let entry = dev.regs().art(ART_NTUPLE_USER + 1);
    assert_eq!(entry.mask, ART_TAG_L3_V4_MASK);
    assert_eq!(entry.tag, 2 << 8);
    assert_eq!(entry.action, Gen2Action::DROP);
    assert_eq!(dev.pool("l4").entries.len(), 1);

    dev.filters.delete(32).unwrap();
    assert_eq!(dev.regs().art(ART_NTUPLE_USER), ArtEntry::DISABLED);
    assert_eq!(dev.filters.get(33).unwrap(), rule);
}

#[test]
fn atom_exhaustion_changes_nothing() {
    let mut dev = dev_setup(&RxfCfg { l3_v4_atoms: 2, ..RxfCfg::rpf2() });

    for (loc, dst) in [(32, "10.0.0.1"), (33, "10.0.0.2")] {
        let rule = tcp4_rule(RuleLocation::At(loc), Some(dst), None, queue(1));
        dev.filters.insert(&rule).unwrap();
    }

    let rule = tcp4_rule(RuleLocation::At(34), Some("10.0.0.3"), None, queue(1));
    let res = assert_no_change!(dev, dev.filters.insert(&rule));
    assert_eq!(res, Err(RxfError::PoolExhausted("l3-v4".into())));

    let rule = udp4_rule(RuleLocation::At(34), None, Some(53), queue(1));
    assert_rxf_err!(dev.filters.insert(&rule), RxfError::PoolExhausted(_));

    // An equal key still fits.
    let rule = tcp4_rule(RuleLocation::At(34), Some("10.0.0.2"), Some(22), queue(1));
    assert_eq!(dev.filters.insert(&rule), Ok(34));
    assert_eq!(dev.pool_usage("l3-v4", 1), 2);
}

#[test]
fn overwrite_moves_atom_references() {
    let mut dev = rpf2_dev();

    let rule = tcp4_rule(RuleLocation::At(32), Some("10.0.0.1"), Some(80), queue(1));
    dev.filters.insert(&rule).unwrap();
    let rule = tcp4_rule(RuleLocation::At(32), Some("10.0.0.9"), Some(80), queue(1));
    dev.filters.insert(&rule).unwrap();

    let l3 = dev.pool("l3-v4");
    assert_eq!(l3.entries.len(), 1);
    assert_eq!(l3.entries[0].key, "dst=10.0.0.9 proto=6");
    assert_eq!(dev.pool_usage("l4", 0), 1);
    assert_eq!(dev.filters.get(32).unwrap(), rule);
}

#[test]
fn ipv6_rules_use_one_slot() {
    let mut dev = rpf2_dev();

    let v6 = tcp6_rule(RuleLocation::At(33), Some("fd00::1"), Some(80), queue(1));
    assert_eq!(dev.filters.insert(&v6), Ok(33));
    let v4 = tcp4_rule(RuleLocation::At(34), Some("10.0.0.1"), Some(80), queue(1));
    assert_eq!(dev.filters.insert(&v4), Ok(34));

    // Both atoms sit in register 0, one in each half.
    assert_eq!(dev.pool_usage("l3-v6", 0), 1);
    assert_eq!(dev.pool_usage("l3-v4", 0), 1);
    let ctl = dev.regs().get(Reg::L3Ctrl(0));
    assert_ne!(ctl & 0xffff, 0);
    assert_ne!(ctl & 0xffff_0000, 0);

    // The two rules share the port atom.
    assert_eq!(dev.pool_usage("l4", 0), 2);
    assert_eq!(dev.regs().get(Reg::L3V6Dst(0, 0)), 1);
}

#[test]
fn etype_tags_follow_actions() {
    let mut dev = dev_setup(&RxfCfg { etype_tag_top: 2, ..RxfCfg::rpf2() });

    dev.filters
        .insert(&etype_rule(RuleLocation::At(16), 0x0806, queue(1)))
        .unwrap();
    dev.filters
        .insert(&etype_rule(RuleLocation::At(17), 0x88cc, queue(1)))
        .unwrap();

    chk!(dev, dev.pool_usage("etype-tags", 0) == 2);
    assert_eq!(dev.regs().get(Reg::EtypeTag(0)), 1);
    assert_eq!(dev.regs().get(Reg::EtypeTag(1)), 1);
    assert_eq!(
        dev.regs().art(ART_ETYPE_USER),
        ArtEntry {
            tag: 1,
            mask: ART_TAG_ET_MASK,
            action: Gen2Action::assign_queue(1),
        }
    );

    // Retargeting a slot moves its tag.
    dev.filters
        .insert(&etype_rule(RuleLocation::At(17), 0x88cc, RingCookie::drop()))
        .unwrap();
    assert_eq!(dev.pool_usage("etype-tags", 0), 1);
    assert_eq!(dev.pool_usage("etype-tags", 1), 1);
    assert_eq!(dev.regs().get(Reg::EtypeTag(1)), 2);

    // Two tags, both in use.
    let rule = etype_rule(RuleLocation::At(18), 0x86dd, RingCookie::any());
    let res = assert_no_change!(dev, dev.filters.insert(&rule));
    assert_eq!(res, Err(RxfError::PoolExhausted("etype-tags".into())));

    dev.filters.delete(16).unwrap();
    assert!(dev.pool("etype-tags").entries.iter().all(|e| e.index == 1));
    assert_eq!(dev.regs().art(ART_ETYPE_USER), ArtEntry::DISABLED);
    assert_eq!(dev.filters.insert(&rule), Ok(18));
}

#[test]
fn etype_overwrite_with_one_tag() {
    let mut dev = dev_setup(&RxfCfg { etype_tag_top: 1, ..RxfCfg::rpf2() });

    dev.filters
        .insert(&etype_rule(RuleLocation::At(16), 0x0806, queue(1)))
        .unwrap();
    let rule = etype_rule(RuleLocation::At(16), 0x0806, RingCookie::drop());
    assert_eq!(dev.filters.insert(&rule), Ok(16));

    chk!(dev, dev.pool_usage("etype-tags", 0) == 1);
    assert_eq!(dev.regs().get(Reg::EtypeTag(0)), 1);
    assert_eq!(dev.regs().art(ART_ETYPE_USER).action, Gen2Action::DROP);
    assert_eq!(dev.filters.get(16).unwrap(), rule);
}

#[test]
fn wildcard_ip_rule_takes_no_atoms() {
    let mut dev = rpf2_dev();

    let rule = ip4_rule(RuleLocation::At(32), None, None, queue(2));
    assert_eq!(dev.filters.insert(&rule), Ok(32));
    chk!(dev, dev.pool("l3-v4").entries.is_empty());
    assert!(dev.pool("l4").entries.is_empty());
    assert_eq!(dev.regs().get(Reg::L3Ctrl(0)), 0);
    assert_eq!(dev.filters.dump().slots[0].binding.as_deref(), Some(""));

    // The atom pools are still whole for rules that need them.
    let rule = tcp4_rule(RuleLocation::At(33), Some("10.0.0.1"), None, queue(1));
    dev.filters.insert(&rule).unwrap();
    assert_eq!(dev.pool_usage("l3-v4", 0), 1);
}

#[test]
fn vlan_tags() {
    let mut dev = rpf2_dev();

    dev.filters.vlan_add(5);
    assert_eq!(dev.regs().get(Reg::VlanTag(0)), 1);
    assert_eq!(dev.regs().art(ART_VLAN_USER), ArtEntry::DISABLED);

    dev.filters.insert(&vlan_rule(RuleLocation::At(0), 5, queue(2))).unwrap();
    assert_eq!(dev.regs().get(Reg::VlanTag(0)), 2);
    assert_eq!(
        dev.regs().art(ART_VLAN_USER),
        ArtEntry {
            tag: 2 << 3,
            mask: ART_TAG_VLAN_MASK,
            action: Gen2Action::assign_queue(2),
        }
    );

    dev.filters.delete(0).unwrap();
    assert_eq!(dev.regs().get(Reg::VlanTag(0)), 1);
    assert_eq!(dev.regs().art(ART_VLAN_USER), ArtEntry::DISABLED);
}

#[test]
fn refresh_keeps_references() {
    let mut dev = rpf2_dev();
    dev.filters
        .insert(&tcp4_rule(RuleLocation::At(32), Some("10.0.0.1"), Some(80), queue(1)))
        .unwrap();
    dev.filters
        .insert(&tcp4_rule(RuleLocation::At(33), Some("10.0.0.1"), None, queue(1)))
        .unwrap();

    let before: Vec<_> = dev.regs().nonzero().collect();
    let pools = format!("{:?}", dev.filters.dump().pools);
    dev.filters.refresh();

    assert_eq!(before, dev.regs().nonzero().collect::<Vec<_>>());
    assert_eq!(pools, format!("{:?}", dev.filters.dump().pools));
    assert_eq!(dev.regs().write_count(Reg::L3Ctrl(0)), 2);
}

#[test]
fn dump_names_bindings() {
    let mut dev = rpf2_dev();
    dev.filters
        .insert(&tcp4_rule(RuleLocation::At(32), Some("10.0.0.1"), Some(80), queue(1)))
        .unwrap();
    dev.filters
        .insert(&etype_rule(RuleLocation::At(16), 0x0806, queue(1)))
        .unwrap();

    let dump = dev.filters.dump();
    assert_eq!(dump.generation, Generation::Rpf2);
    let names: Vec<_> = dump.pools.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["etype-tags", "l3-v4", "l3-v6", "l4"]);
    assert_eq!(dump.slots[0].binding.as_deref(), Some("tag 1"));
    assert_eq!(dump.slots[1].binding.as_deref(), Some("l3-v4 #0, l4 #0"));

    let mut out = Vec::new();
    print_filters_into(&mut out, &dump).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("Pool l3-v4 (1/8)"));
    assert!(out.contains("dst=10.0.0.1 proto=6"));
}
