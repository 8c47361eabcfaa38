// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Receive filter administration library.
//!
//! The handle drives a simulated device through the same command
//! channel a driver exposes. A device lives as long as its handle.
//! Given a session file, every change that succeeds is appended to a
//! journal there, and the journal is replayed when the next handle is
//! opened on the same file.

use rxf::api::CmdOk;
use rxf::api::DeleteRuleReq;
use rxf::api::DumpFiltersResp;
use rxf::api::FilterKind;
use rxf::api::FlowRule;
use rxf::api::GetRuleReq;
use rxf::api::GetRuleResp;
use rxf::api::InsertRuleReq;
use rxf::api::InsertRuleResp;
use rxf::api::ListRulesReq;
use rxf::api::ListRulesResp;
use rxf::api::NoResp;
use rxf::api::ReleaseFilterReq;
use rxf::api::ReserveFilterReq;
use rxf::api::ReserveFilterResp;
use rxf::api::RuleCountResp;
use rxf::api::RuleDesc;
use rxf::api::RxRingsResp;
use rxf::api::RxfCfg;
use rxf::api::RxfCmd;
use rxf::api::RxfCmdIoctl;
use rxf::api::RxfError;
use rxf::api::VlanReq;
use rxf::engine::RxFilters;
use rxf::engine::ioctl::handle_cmd;
use rxf::engine::regs::MemRegs;
use rxf::engine::regs::RegPort;
use rxf::print::print_filters_into;
use rxf::print::print_list_into;
use rxf::print::print_rule_into;
use rxf::provider::LogProvider;
use rxf::provider::NullLog;
use rxf::provider::PrintlnLog;
use rxf::provider::Providers;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// Errors related to administering receive filters.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file {0}: {1}")]
    BadState(PathBuf, String),

    #[error("state file {0} belongs to a device with a different config")]
    CfgMismatch(PathBuf),

    #[error("failed to bring up device: {0}")]
    Setup(RxfError),

    #[error("request serialization failed for command {0:?}: {1}")]
    ReqSer(RxfCmd, postcard::Error),

    #[error("response deserialization failed for command {0:?}: {1}")]
    RespDeser(RxfCmd, postcard::Error),

    #[error("failed to get response for command {0:?} in {1} attempts")]
    MaxAttempts(RxfCmd, u8),

    #[error("command {0:?} failed: {1}")]
    CommandError(RxfCmd, RxfError),
}

/// A change to the device, as recorded in the journal.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Op {
    /// The rule as it was sent. A wildcard location stays a wildcard:
    /// replaying the same history makes the device pick the same slot.
    Insert(FlowRule),
    Delete(u32),
    AddVlan(u16),
    KillVlan(u16),
    Reserve(FilterKind),
    Release(FilterKind),
}

/// One step of a replay script.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ScriptCmd {
    Insert(RuleDesc),
    Delete(u32),
    Get(u32),
    List,
    AddVlan(u16),
    KillVlan(u16),
    Reserve(FilterKind),
    Release(FilterKind),
    Refresh,
    Dump,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Journal {
    pub cfg: RxfCfg,
    pub ops: Vec<Op>,
}

/// The handle used to send administration commands to a device.
pub struct RxfAdm {
    filters: RxFilters<MemRegs>,
    journal: Journal,
    state: Option<PathBuf>,
}

impl RxfAdm {
    /// Bring up a device, restoring it from `state` when that file
    /// exists.
    ///
    /// A `cfg` is only needed for a new device. Passing one that
    /// disagrees with the saved device is an error.
    pub fn open(
        state: Option<&Path>,
        cfg: Option<RxfCfg>,
        verbose: bool,
    ) -> Result<Self, Error> {
        let saved = match state {
            Some(path) if path.exists() => Some(load_journal(path)?),
            _ => None,
        };

        let journal = match (saved, cfg) {
            (Some(journal), Some(cfg)) if journal.cfg != cfg => {
                let path = state.map(Path::to_path_buf).unwrap_or_default();
                return Err(Error::CfgMismatch(path));
            }

            (Some(journal), _) => journal,
            (None, cfg) => Journal { cfg: cfg.unwrap_or_default(), ops: vec![] },
        };

        let log: Box<dyn LogProvider> =
            if verbose { Box::new(PrintlnLog) } else { Box::new(NullLog) };
        let mut filters =
            RxFilters::new(&journal.cfg, MemRegs::new(), Providers { log })
                .map_err(Error::Setup)?;

        for op in &journal.ops {
            replay_op(&mut filters, op).map_err(|e| {
                Error::BadState(
                    state.map(Path::to_path_buf).unwrap_or_default(),
                    format!("replay of {op:?} failed: {e}"),
                )
            })?;
        }

        Ok(Self { filters, journal, state: state.map(Path::to_path_buf) })
    }

    pub fn cfg(&self) -> &RxfCfg {
        &self.journal.cfg
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn record(&mut self, op: Op) -> Result<(), Error> {
        self.journal.ops.push(op);
        match &self.state {
            Some(path) => save_journal(path, &self.journal),
            None => Ok(()),
        }
    }

    /// Insert a rule, returning the location it landed on.
    pub fn insert_rule(
        &mut self,
        rule: &FlowRule,
    ) -> Result<InsertRuleResp, Error> {
        let req = InsertRuleReq { rule: *rule };
        let resp: InsertRuleResp =
            run_cmd(&mut self.filters, RxfCmd::InsertRule, Some(&req))?;
        self.record(Op::Insert(*rule))?;
        Ok(resp)
    }

    pub fn delete_rule(&mut self, location: u32) -> Result<NoResp, Error> {
        let req = DeleteRuleReq { location };
        let resp = run_cmd(&mut self.filters, RxfCmd::DeleteRule, Some(&req))?;
        self.record(Op::Delete(location))?;
        Ok(resp)
    }

    pub fn get_rule(&mut self, location: u32) -> Result<GetRuleResp, Error> {
        let req = GetRuleReq { location };
        run_cmd(&mut self.filters, RxfCmd::GetRule, Some(&req))
    }

    pub fn count_rules(&mut self) -> Result<RuleCountResp, Error> {
        run_cmd::<_, (), _>(&mut self.filters, RxfCmd::CountRules, None)
    }

    /// List enabled rule locations, asking for room for every slot.
    pub fn list_rules(&mut self) -> Result<ListRulesResp, Error> {
        let req = ListRulesReq { capacity: self.count_rules()?.max };
        run_cmd(&mut self.filters, RxfCmd::ListRules, Some(&req))
    }

    pub fn rx_rings(&mut self) -> Result<RxRingsResp, Error> {
        run_cmd::<_, (), _>(&mut self.filters, RxfCmd::RxRings, None)
    }

    pub fn add_vlan(&mut self, vid: u16) -> Result<NoResp, Error> {
        let req = VlanReq { vid };
        let resp = run_cmd(&mut self.filters, RxfCmd::AddVlan, Some(&req))?;
        self.record(Op::AddVlan(vid))?;
        Ok(resp)
    }

    pub fn kill_vlan(&mut self, vid: u16) -> Result<NoResp, Error> {
        let req = VlanReq { vid };
        let resp = run_cmd(&mut self.filters, RxfCmd::KillVlan, Some(&req))?;
        self.record(Op::KillVlan(vid))?;
        Ok(resp)
    }

    pub fn reserve(
        &mut self,
        kind: FilterKind,
    ) -> Result<ReserveFilterResp, Error> {
        let req = ReserveFilterReq { kind };
        let resp =
            run_cmd(&mut self.filters, RxfCmd::ReserveFilter, Some(&req))?;
        self.record(Op::Reserve(kind))?;
        Ok(resp)
    }

    pub fn release(&mut self, kind: FilterKind) -> Result<NoResp, Error> {
        let req = ReleaseFilterReq { kind };
        let resp =
            run_cmd(&mut self.filters, RxfCmd::ReleaseFilter, Some(&req))?;
        self.record(Op::Release(kind))?;
        Ok(resp)
    }

    pub fn refresh(&mut self) -> Result<NoResp, Error> {
        run_cmd::<_, (), _>(&mut self.filters, RxfCmd::Refresh, None)
    }

    pub fn dump(&mut self) -> Result<DumpFiltersResp, Error> {
        run_cmd::<_, (), _>(&mut self.filters, RxfCmd::DumpFilters, None)
    }
}

impl RxfAdm {
    /// Run every step of `script`, reporting each outcome to `out`.
    ///
    /// A failed step doesn't stop the script. Returns the number of
    /// steps that failed.
    pub fn run_script(
        &mut self,
        script: &[ScriptCmd],
        out: &mut impl Write,
    ) -> Result<usize, Error> {
        let mut failed = 0;

        for (i, cmd) in script.iter().enumerate() {
            writeln!(out, "[{i}] {cmd:?}")?;
            match self.run_script_cmd(cmd, out) {
                Ok(()) => (),
                Err(Error::Io(e)) => return Err(Error::Io(e)),
                Err(e) => {
                    writeln!(out, "    error: {e}")?;
                    failed += 1;
                }
            }
        }

        Ok(failed)
    }

    fn run_script_cmd(
        &mut self,
        cmd: &ScriptCmd,
        out: &mut impl Write,
    ) -> Result<(), Error> {
        match cmd {
            ScriptCmd::Insert(desc) => {
                let rule = desc.to_rule().map_err(|e| {
                    Error::CommandError(
                        RxfCmd::InsertRule,
                        RxfError::MalformedRule(e),
                    )
                })?;
                let resp = self.insert_rule(&rule)?;
                writeln!(out, "    location {}", resp.location)?;
            }

            ScriptCmd::Delete(location) => {
                self.delete_rule(*location)?;
            }

            ScriptCmd::Get(location) => {
                let resp = self.get_rule(*location)?;
                print_rule_into(out, &resp.rule)?;
            }

            ScriptCmd::List => {
                let count = self.count_rules()?;
                print_list_into(out, &count, &self.list_rules()?)?;
            }

            ScriptCmd::AddVlan(vid) => {
                self.add_vlan(*vid)?;
            }

            ScriptCmd::KillVlan(vid) => {
                self.kill_vlan(*vid)?;
            }

            ScriptCmd::Reserve(kind) => {
                let resp = self.reserve(*kind)?;
                writeln!(out, "    slot {}", resp.slot)?;
            }

            ScriptCmd::Release(kind) => {
                self.release(*kind)?;
            }

            ScriptCmd::Refresh => {
                self.refresh()?;
            }

            ScriptCmd::Dump => {
                print_filters_into(out, &self.dump()?)?;
            }
        }

        Ok(())
    }
}

fn load_journal(path: &Path) -> Result<Journal, Error> {
    let contents = std::fs::read_to_string(path)?;
    ron::from_str(&contents)
        .map_err(|e| Error::BadState(path.to_path_buf(), e.to_string()))
}

fn save_journal(path: &Path, journal: &Journal) -> Result<(), Error> {
    let contents =
        ron::ser::to_string_pretty(journal, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadState(path.to_path_buf(), e.to_string()))?;
    std::fs::write(path, contents)?;
    Ok(())
}

fn replay_op<P: RegPort>(
    filters: &mut RxFilters<P>,
    op: &Op,
) -> Result<(), Error> {
    match op {
        Op::Insert(rule) => {
            let req = InsertRuleReq { rule: *rule };
            run_cmd::<InsertRuleResp, _, _>(filters, RxfCmd::InsertRule, Some(&req))?;
        }

        Op::Delete(location) => {
            let req = DeleteRuleReq { location: *location };
            run_cmd::<NoResp, _, _>(filters, RxfCmd::DeleteRule, Some(&req))?;
        }

        Op::AddVlan(vid) => {
            let req = VlanReq { vid: *vid };
            run_cmd::<NoResp, _, _>(filters, RxfCmd::AddVlan, Some(&req))?;
        }

        Op::KillVlan(vid) => {
            let req = VlanReq { vid: *vid };
            run_cmd::<NoResp, _, _>(filters, RxfCmd::KillVlan, Some(&req))?;
        }

        Op::Reserve(kind) => {
            let req = ReserveFilterReq { kind: *kind };
            run_cmd::<ReserveFilterResp, _, _>(
                filters,
                RxfCmd::ReserveFilter,
                Some(&req),
            )?;
        }

        Op::Release(kind) => {
            let req = ReleaseFilterReq { kind: *kind };
            run_cmd::<NoResp, _, _>(filters, RxfCmd::ReleaseFilter, Some(&req))?;
        }
    }

    Ok(())
}

/// Send one command to the device and decode its response.
pub fn run_cmd<T, R, P>(
    filters: &mut RxFilters<P>,
    cmd: RxfCmd,
    req: Option<&R>,
) -> Result<T, Error>
where
    T: CmdOk + DeserializeOwned,
    R: Serialize,
    P: RegPort,
{
    let req_bytes = match req {
        Some(req) => {
            let bytes = postcard::to_allocvec(req)
                .map_err(|e| Error::ReqSer(cmd, e))?;
            // An empty body reads as a missing one on the device side,
            // so a ZST request type can never work.
            assert!(!bytes.is_empty(), "cannot use ZST for request type");
            bytes
        }

        None => vec![],
    };

    // It would be a shame if the command failed and we didn't have
    // enough room for the error, so start at 16 KiB.
    const BASE_CAPACITY: usize = 16 * 1024;
    let mut ioctl = RxfCmdIoctl::new(cmd, req_bytes, BASE_CAPACITY);

    const MAX_ITERATIONS: u8 = 3;
    for _ in 0..MAX_ITERATIONS {
        let resp = handle_cmd(filters, &ioctl);

        let Some(cmd_err) = resp.cmd_err_resp() else {
            return postcard::from_bytes(&resp.resp_bytes)
                .map_err(|e| Error::RespDeser(cmd, e));
        };

        match cmd_err {
            // The command ran, but the response didn't fit. Every retry
            // reruns the command, so keep some headroom in case the
            // next response is larger still.
            RxfError::RespTooLarge { needed, .. }
                if resp.errno == libc::ENOBUFS =>
            {
                ioctl.resp_len = BASE_CAPACITY / 4 + needed;
            }

            err => return Err(Error::CommandError(cmd, err)),
        }
    }

    Err(Error::MaxAttempts(cmd, MAX_ITERATIONS))
}

#[cfg(test)]
mod test {
    use super::*;
    use rxf::api::RingCookie;

    fn state_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("rxfadm-{}-{name}.ron", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn tcp_rule(dport: u16) -> FlowRule {
        RuleDesc {
            flow: "tcp4".into(),
            dport: Some(dport),
            ring: "2".into(),
            ..Default::default()
        }
        .to_rule()
        .unwrap()
    }

    #[test]
    fn journal_survives_reopen() {
        let path = state_path("reopen");

        let mut adm = RxfAdm::open(Some(&path), None, false).unwrap();
        assert_eq!(adm.insert_rule(&tcp_rule(80)).unwrap().location, 32);
        adm.add_vlan(100).unwrap();
        adm.reserve(FilterKind::Etype).unwrap();
        drop(adm);

        let mut adm = RxfAdm::open(Some(&path), None, false).unwrap();
        assert_eq!(adm.list_rules().unwrap().locations, vec![0, 32]);
        let rule = adm.get_rule(32).unwrap().rule;
        assert_eq!(rule.ring_cookie, RingCookie::queue(2));
        assert_eq!(adm.count_rules().unwrap().max, 41);
        assert_eq!(adm.journal().ops[0], Op::Insert(tcp_rule(80)));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn reopen_after_subinterface_slot_taken() {
        let path = state_path("repl");
        let cfg = RxfCfg { vlan_slots: 2, ..RxfCfg::rpf1() };
        let rule = RuleDesc {
            vid: Some(99),
            ring: "3".into(),
            ..Default::default()
        }
        .to_rule()
        .unwrap();

        let mut adm = RxfAdm::open(Some(&path), Some(cfg), false).unwrap();
        adm.add_vlan(1).unwrap();
        adm.add_vlan(2).unwrap();
        assert_eq!(adm.insert_rule(&rule).unwrap().location, 0);
        let before = adm.dump().unwrap();
        drop(adm);

        let mut adm = RxfAdm::open(Some(&path), None, false).unwrap();
        let after = adm.dump().unwrap();
        assert_eq!(after.vlan.active_vids, before.vlan.active_vids);
        assert_eq!(after.vlan.overflow, 1);
        assert!(after.vlan.promisc);
        let got = adm.get_rule(0).unwrap().rule;
        assert_eq!(got.ring_cookie, RingCookie::queue(3));
        assert_eq!(got.ext.map(|e| e.vlan_tci.value), Some(99));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn failed_commands_are_not_recorded() {
        let mut adm = RxfAdm::open(None, None, false).unwrap();
        let err = adm.kill_vlan(5).unwrap_err();
        assert!(matches!(
            err,
            Error::CommandError(RxfCmd::KillVlan, RxfError::UnknownVlan(5))
        ));
        assert!(adm.journal().ops.is_empty());
    }

    #[test]
    fn cfg_mismatch() {
        let path = state_path("mismatch");
        let mut adm = RxfAdm::open(Some(&path), None, false).unwrap();
        adm.add_vlan(7).unwrap();
        drop(adm);

        let res = RxfAdm::open(Some(&path), Some(RxfCfg::rpf2()), false);
        assert!(matches!(res, Err(Error::CfgMismatch(_))));
        let adm = RxfAdm::open(Some(&path), Some(RxfCfg::rpf1()), false);
        assert!(adm.is_ok());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn script_keeps_going_after_errors() {
        let script: Vec<ScriptCmd> = ron::from_str(
            r#"[
                AddVlan(10),
                KillVlan(11),
                Insert((flow: "tcp4", dport: Some(80), ring: "3")),
                Insert((flow: "gre")),
                Get(32),
                List,
            ]"#,
        )
        .unwrap();

        let mut adm = RxfAdm::open(None, None, false).unwrap();
        let mut out = Vec::new();
        assert_eq!(adm.run_script(&script, &mut out).unwrap(), 2);

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("VLAN 11 not active"));
        assert!(out.contains("location 32"));
        assert!(out.contains("RULES:"));
        assert_eq!(adm.journal().ops.len(), 2);
    }

    #[test]
    fn full_device_dump() {
        let mut adm =
            RxfAdm::open(None, Some(RxfCfg::rpf2()), false).unwrap();
        for port in 0..8 {
            adm.insert_rule(&tcp_rule(1000 + port)).unwrap();
        }
        for vid in 1..=16 {
            adm.add_vlan(vid).unwrap();
        }

        let dump = adm.dump().unwrap();
        assert_eq!(dump.slots.len(), 24);
        assert_eq!(adm.rx_rings().unwrap().rx_rings, 8);
        adm.refresh().unwrap();
    }
}
