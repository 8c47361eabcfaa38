// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print command responses in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both rxfadm and integration tests.

use crate::api::DumpFiltersResp;
use crate::api::FlowExt;
use crate::api::FlowRule;
use crate::api::FlowSpec;
use crate::api::ListRulesResp;
use crate::api::MaskField;
use crate::api::Masked;
use crate::api::PoolDump;
use crate::api::RuleCountResp;
use crate::api::VlanStateDump;
use core::fmt::Display;
use std::io::Write;
use std::string::String;
use std::string::ToString;
use std::vec::Vec;
use tabwriter::TabWriter;

/// Render a masked field: `*` when wildcarded, the value when exact,
/// and `value/mask` otherwise.
fn field<T: MaskField + Display>(m: &Masked<T>) -> String {
    match m.binary() {
        Ok(None) => "*".to_string(),
        Ok(Some(v)) => v.to_string(),
        Err(_) => format!("{}/{}", m.value, m.mask),
    }
}

fn hex16(m: &Masked<u16>) -> String {
    match m.binary() {
        Ok(None) => "*".to_string(),
        Ok(Some(v)) => format!("0x{v:04x}"),
        Err(_) => format!("0x{:04x}/0x{:04x}", m.value, m.mask),
    }
}

/// A one-line summary of the match fields a rule sets.
pub fn match_summary(flow: &FlowSpec, ext: Option<&FlowExt>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut push = |name: &str, val: String| {
        if val != "*" {
            parts.push(format!("{name}={val}"));
        }
    };

    match flow {
        FlowSpec::Ether(e) => {
            push("src", field(&e.src));
            push("dst", field(&e.dst));
            push("etype", hex16(&e.ether_type));
        }

        FlowSpec::TcpV4(s) | FlowSpec::UdpV4(s) | FlowSpec::SctpV4(s) => {
            push("src", field(&s.src));
            push("dst", field(&s.dst));
            push("sport", field(&s.src_port));
            push("dport", field(&s.dst_port));
        }

        FlowSpec::Ip4User(s) => {
            push("src", field(&s.src));
            push("dst", field(&s.dst));
            push("proto", field(&s.proto));
        }

        FlowSpec::TcpV6(s) | FlowSpec::UdpV6(s) | FlowSpec::SctpV6(s) => {
            push("src", field(&s.src));
            push("dst", field(&s.dst));
            push("sport", field(&s.src_port));
            push("dport", field(&s.dst_port));
        }

        FlowSpec::Ip6User(s) => {
            push("src", field(&s.src));
            push("dst", field(&s.dst));
            push("proto", field(&s.l4_proto));
        }
    }

    if let Some(ext) = ext {
        push("vlan-etype", hex16(&ext.vlan_etype));
        push("tci", hex16(&ext.vlan_tci));
    }

    if parts.is_empty() { "*".to_string() } else { parts.join(" ") }
}

fn print_slot_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "LOC\tKIND\tIDX\tFLOW\tMATCH\tRING\tBINDING")
}

fn print_pool_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "IDX\tUSAGE\tKEY")
}

/// Print a [`DumpFiltersResp`].
pub fn print_filters(resp: &DumpFiltersResp) -> std::io::Result<()> {
    print_filters_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpFiltersResp`] into a given writer.
pub fn print_filters_into(
    writer: &mut impl Write,
    resp: &DumpFiltersResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Receive Filters ({})", resp.generation)?;
    write_hrb(&mut t)?;
    print_slot_header(&mut t)?;
    for slot in &resp.slots {
        let loc = match slot.rule.location {
            crate::api::RuleLocation::At(loc) => loc.to_string(),
            crate::api::RuleLocation::Any => "-".to_string(),
        };

        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            loc,
            slot.kind,
            slot.index,
            slot.rule.flow,
            match_summary(&slot.rule.flow, slot.rule.ext.as_ref()),
            slot.rule.ring_cookie,
            slot.binding.as_deref().unwrap_or("-"),
        )?;
    }
    t.flush()?;

    for pool in &resp.pools {
        print_pool(&mut t, pool)?;
    }

    print_vlan_state(&mut t, &resp.vlan)?;
    writeln!(t)?;
    t.flush()
}

fn print_pool(t: &mut impl Write, pool: &PoolDump) -> std::io::Result<()> {
    writeln!(t, "\nPool {} ({}/{})", pool.name, pool.entries.len(), pool.size)?;
    write_hr(t)?;
    print_pool_header(t)?;
    for e in &pool.entries {
        writeln!(t, "{}\t{}\t{}", e.index, e.usage, e.key)?;
    }
    Ok(())
}

fn print_vlan_state(
    t: &mut impl Write,
    vlan: &VlanStateDump,
) -> std::io::Result<()> {
    writeln!(t, "\nVLAN Subinterfaces")?;
    write_hr(t)?;
    let vids: Vec<String> =
        vlan.active_vids.iter().map(|v| v.to_string()).collect();
    let vids = if vids.is_empty() { "-".to_string() } else { vids.join(",") };
    writeln!(t, "ACTIVE:\t{vids}")?;
    writeln!(t, "OVERFLOW:\t{}", vlan.overflow)?;
    writeln!(t, "PROMISC:\t{}", if vlan.promisc { "on" } else { "off" })
}

/// Print a single rule, as returned by a get.
pub fn print_rule(rule: &FlowRule) -> std::io::Result<()> {
    print_rule_into(&mut std::io::stdout(), rule)
}

/// Print a single rule into a given writer.
pub fn print_rule_into(
    writer: &mut impl Write,
    rule: &FlowRule,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "LOCATION:\t{}", rule.location)?;
    writeln!(t, "FLOW:\t{}", rule.flow)?;
    writeln!(t, "MATCH:\t{}", match_summary(&rule.flow, rule.ext.as_ref()))?;
    writeln!(t, "RING:\t{}", rule.ring_cookie)?;
    t.flush()
}

/// Print a [`RuleCountResp`] together with the enabled locations.
pub fn print_list(
    count: &RuleCountResp,
    list: &ListRulesResp,
) -> std::io::Result<()> {
    print_list_into(&mut std::io::stdout(), count, list)
}

/// Print a [`RuleCountResp`] and [`ListRulesResp`] into a given writer.
pub fn print_list_into(
    writer: &mut impl Write,
    count: &RuleCountResp,
    list: &ListRulesResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "RULES:\t{}/{}", count.count, count.max)?;
    writeln!(
        t,
        "SPECIAL LOCATIONS:\t{}",
        if count.special_locations { "yes" } else { "no" }
    )?;
    write_hr(&mut t)?;
    for loc in &list.locations {
        writeln!(t, "{loc}")?;
    }
    t.flush()
}

/// Print horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::EtherSpec;
    use crate::api::Ipv4Addr;
    use crate::api::Ipv4L4Spec;

    #[test]
    fn summary_lists_exact_fields() {
        let tcp = FlowSpec::TcpV4(Ipv4L4Spec {
            dst: Masked::exact(Ipv4Addr::from([10, 0, 0, 1])),
            dst_port: Masked::exact(80),
            ..Default::default()
        });
        assert_eq!(match_summary(&tcp, None), "dst=10.0.0.1 dport=80");

        let eth = FlowSpec::Ether(EtherSpec::default());
        let ext = FlowExt {
            vlan_tci: Masked::exact(0x0064),
            ..Default::default()
        };
        assert_eq!(match_summary(&eth, Some(&ext)), "tci=0x0064");
        assert_eq!(match_summary(&eth, None), "*");
    }
}
