// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use clap::Parser;
use clap::Subcommand;

use rxf::api::FilterKind;
use rxf::api::Generation;
use rxf::api::RuleDesc;
use rxf::api::RxfCfg;
use rxf::print::print_filters;
use rxf::print::print_list;
use rxf::print::print_rule;
use rxfadm::RxfAdm;
use rxfadm::ScriptCmd;

/// Administer the receive classification filters of a (simulated) NIC.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    dev: DevOpts,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Args)]
struct DevOpts {
    /// A session file journaling the device's changes. Without one,
    /// every invocation starts from a fresh device.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// A TOML device configuration, used when creating a device.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Filter generation of a new device with the default
    /// configuration. Ignored when --config is given.
    #[arg(long, global = true)]
    generation: Option<Generation>,

    /// Print the device's log messages.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert a rule.
    Insert {
        #[command(flatten)]
        rule: RuleArgs,
    },

    /// Delete the rule at a location.
    Delete { location: u32 },

    /// Show the rule at a location.
    Get { location: u32 },

    /// List enabled rule locations.
    List,

    /// Show the number of rules and the table size.
    Count,

    /// Show the number of active receive rings.
    RxRings,

    /// Tell the device a VLAN subinterface was created.
    AddVlan { vid: u16 },

    /// Tell the device a VLAN subinterface was destroyed.
    KillVlan { vid: u16 },

    /// Reserve the last slot of a category for the forwarding path.
    Reserve { kind: FilterKind },

    /// Release a reserved slot.
    Release { kind: FilterKind },

    /// Rewrite every filter register from memory.
    Refresh,

    /// Dump slots, shared pools, and VLAN state.
    Dump,

    /// Print the device configuration as TOML.
    ShowConfig,

    /// Run a RON script of commands, then dump the device.
    Replay { script: PathBuf },
}

#[derive(Debug, Args)]
struct RuleArgs {
    /// The rule location. The device picks one when omitted.
    #[arg(long)]
    loc: Option<u32>,

    /// Flow type: ether, tcp4, udp4, sctp4, ip4, tcp6, udp6, sctp6,
    /// or ip6.
    #[arg(long, default_value = "ether")]
    flow: String,

    #[arg(long)]
    src: Option<String>,

    #[arg(long)]
    dst: Option<String>,

    #[arg(long)]
    sport: Option<u16>,

    #[arg(long)]
    dport: Option<u16>,

    /// EtherType, in hex with a 0x prefix or decimal.
    #[arg(long, value_parser = parse_etype)]
    etype: Option<u16>,

    #[arg(long)]
    proto: Option<u8>,

    /// Match the VLAN ID of the 802.1Q tag.
    #[arg(long)]
    vid: Option<u16>,

    /// A ring number, any, or drop.
    #[arg(long, default_value = "any")]
    ring: String,
}

impl From<RuleArgs> for RuleDesc {
    fn from(args: RuleArgs) -> Self {
        Self {
            loc: args.loc,
            flow: args.flow,
            src: args.src,
            dst: args.dst,
            sport: args.sport,
            dport: args.dport,
            etype: args.etype,
            proto: args.proto,
            vid: args.vid,
            ring: args.ring,
        }
    }
}

fn parse_etype(s: &str) -> Result<u16, String> {
    let res = match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };

    res.map_err(|e| format!("bad EtherType {s}: {e}"))
}

fn load_cfg(opts: &DevOpts) -> anyhow::Result<Option<RxfCfg>> {
    match (&opts.config, opts.generation) {
        (Some(path), _) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let cfg: RxfCfg = toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(Some(cfg))
        }

        (None, Some(generation)) => Ok(Some(RxfCfg::for_generation(generation))),
        (None, None) => Ok(None),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_cfg(&cli.dev)?;
    let mut hdl = RxfAdm::open(cli.dev.state.as_deref(), cfg, cli.dev.verbose)?;

    match cli.cmd {
        Command::Insert { rule } => {
            let rule = RuleDesc::from(rule)
                .to_rule()
                .map_err(|e| anyhow::anyhow!("invalid rule: {e}"))?;
            let resp = hdl.insert_rule(&rule)?;
            println!("inserted rule at location {}", resp.location);
        }

        Command::Delete { location } => {
            hdl.delete_rule(location)?;
        }

        Command::Get { location } => {
            print_rule(&hdl.get_rule(location)?.rule)?;
        }

        Command::List => {
            let count = hdl.count_rules()?;
            print_list(&count, &hdl.list_rules()?)?;
        }

        Command::Count => {
            let count = hdl.count_rules()?;
            println!("{}/{}", count.count, count.max);
        }

        Command::RxRings => {
            println!("{}", hdl.rx_rings()?.rx_rings);
        }

        Command::AddVlan { vid } => {
            hdl.add_vlan(vid)?;
        }

        Command::KillVlan { vid } => {
            hdl.kill_vlan(vid)?;
        }

        Command::Reserve { kind } => {
            let resp = hdl.reserve(kind)?;
            println!("reserved {kind} slot {}", resp.slot);
        }

        Command::Release { kind } => {
            hdl.release(kind)?;
        }

        Command::Refresh => {
            hdl.refresh()?;
        }

        Command::Dump => {
            print_filters(&hdl.dump()?)?;
        }

        Command::ShowConfig => {
            print!("{}", toml::to_string_pretty(hdl.cfg())?);
        }

        Command::Replay { script } => {
            let contents = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let cmds: Vec<ScriptCmd> = ron::from_str(&contents)
                .with_context(|| format!("parsing {}", script.display()))?;

            let failed = hdl.run_script(&cmds, &mut std::io::stdout())?;
            print_filters(&hdl.dump()?)?;
            if failed > 0 {
                anyhow::bail!("{failed} of {} steps failed", cmds.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn etype_forms() {
        assert_eq!(parse_etype("0x88f7"), Ok(0x88f7));
        assert_eq!(parse_etype("2054"), Ok(0x0806));
        assert!(parse_etype("0xzz").is_err());
    }

    #[test]
    fn insert_args() {
        let cli = Cli::parse_from([
            "rxfadm", "insert", "--flow", "udp4", "--dport", "53", "--ring",
            "drop",
        ]);
        let rule = match cli.cmd {
            Command::Insert { rule } => RuleDesc::from(rule).to_rule().unwrap(),
            other => panic!("parsed {other:?}"),
        };
        assert!(rule.ring_cookie.is_discard());
    }

    #[test]
    fn replay_args() {
        let cli = Cli::parse_from([
            "rxfadm", "--generation", "rpf2", "replay", "demos/vlan.ron",
        ]);
        assert!(cli.dev.state.is_none());
        assert_eq!(cli.dev.generation, Some(Generation::Rpf2));
        assert!(matches!(cli.cmd, Command::Replay { .. }));
    }
}
