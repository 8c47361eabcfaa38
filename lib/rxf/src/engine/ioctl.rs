// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The device side of the command channel.
//!
//! Each command arrives as an [`RxfCmdIoctl`] holding a postcard
//! encoded request. It is decoded, run against the device's
//! [`RxFilters`], and answered with an errno plus either the encoded
//! response or the encoded [`RxfError`].

use super::filters::RxFilters;
use super::regs::RegPort;
use crate::api::API_VERSION;
use crate::api::CmdOk;
use crate::api::DeleteRuleReq;
use crate::api::DumpFiltersResp;
use crate::api::GetRuleReq;
use crate::api::GetRuleResp;
use crate::api::InsertRuleReq;
use crate::api::InsertRuleResp;
use crate::api::ListRulesReq;
use crate::api::ListRulesResp;
use crate::api::NoResp;
use crate::api::ReleaseFilterReq;
use crate::api::ReserveFilterReq;
use crate::api::ReserveFilterResp;
use crate::api::RuleCountResp;
use crate::api::RxRingsResp;
use crate::api::RxfCmd;
use crate::api::RxfCmdIoctl;
use crate::api::RxfCmdResp;
use crate::api::RxfError;
use crate::api::VlanReq;
use serde::de::DeserializeOwned;

/// An envelope for dealing with an [`RxfCmdIoctl`]. It contains all
/// information needed to deserialize the caller's request and
/// serialize the device's response.
#[derive(Debug)]
pub struct IoctlEnvelope<'a> {
    ioctl: &'a RxfCmdIoctl,
}

impl<'a> IoctlEnvelope<'a> {
    /// Wrap `ioctl`, or answer it outright if it was built against a
    /// different API version.
    pub fn wrap(ioctl: &'a RxfCmdIoctl) -> Result<Self, RxfCmdResp> {
        if !ioctl.check_version() {
            let badver = RxfError::BadApiVersion {
                user: ioctl.api_version,
                kernel: API_VERSION,
            };

            return Err(copy_out_resp_i::<()>(ioctl.resp_len, &Err(badver)));
        }

        Ok(Self { ioctl })
    }

    pub fn ioctl_cmd(&self) -> RxfCmd {
        self.ioctl.cmd
    }

    /// Return the deserialized request.
    pub fn copy_in_req<T: DeserializeOwned>(&self) -> Result<T, RxfError> {
        if self.ioctl.req_bytes.is_empty() {
            return Err(RxfError::NoRequestBody);
        }

        postcard::from_bytes(&self.ioctl.req_bytes)
            .map_err(|e| RxfError::DeserCmdReq(format!("{e}")))
    }

    pub fn copy_out_resp<T: CmdOk>(
        &self,
        resp: &Result<T, RxfError>,
    ) -> RxfCmdResp {
        copy_out_resp_i(self.ioctl.resp_len, resp)
    }
}

fn copy_out_resp_i<T: CmdOk>(
    resp_len: usize,
    resp: &Result<T, RxfError>,
) -> RxfCmdResp {
    let ser_result = match resp {
        Ok(v) => postcard::to_allocvec(v)
            .map_err(|e| RxfError::SerCmdResp(format!("{e}"))),

        Err(e) => postcard::to_allocvec(e)
            .map_err(|e| RxfError::SerCmdErr(format!("{e}"))),
    };

    let bytes = match ser_result {
        Ok(bytes) => bytes,

        // Still try to tell the caller what went wrong.
        Err(ser_err) => {
            return RxfCmdResp {
                errno: ser_err.to_errno(),
                resp_bytes: postcard::to_allocvec(&ser_err)
                    .unwrap_or_default(),
            };
        }
    };

    // The command ran but its answer doesn't fit. Tell the caller how
    // much room it needs so it can retry.
    if bytes.len() > resp_len {
        let too_large =
            RxfError::RespTooLarge { needed: bytes.len(), given: resp_len };
        return RxfCmdResp {
            errno: too_large.to_errno(),
            resp_bytes: postcard::to_allocvec(&too_large).unwrap_or_default(),
        };
    }

    let errno = match resp {
        Ok(_) => 0,
        Err(e) => e.to_errno(),
    };

    RxfCmdResp { errno, resp_bytes: bytes }
}

fn hdlr_resp<T: CmdOk>(
    env: &IoctlEnvelope,
    resp: Result<T, RxfError>,
) -> RxfCmdResp {
    env.copy_out_resp(&resp)
}

fn insert_rule_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &mut RxFilters<R>,
) -> Result<InsertRuleResp, RxfError> {
    let req: InsertRuleReq = env.copy_in_req()?;
    let location = filters.insert(&req.rule)?;
    Ok(InsertRuleResp { location })
}

fn delete_rule_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &mut RxFilters<R>,
) -> Result<NoResp, RxfError> {
    let req: DeleteRuleReq = env.copy_in_req()?;
    filters.delete(req.location)?;
    Ok(NoResp::default())
}

fn get_rule_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &RxFilters<R>,
) -> Result<GetRuleResp, RxfError> {
    let req: GetRuleReq = env.copy_in_req()?;
    Ok(GetRuleResp { rule: filters.get(req.location)? })
}

fn list_rules_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &RxFilters<R>,
) -> Result<ListRulesResp, RxfError> {
    let req: ListRulesReq = env.copy_in_req()?;
    Ok(ListRulesResp { locations: filters.list_locations(req.capacity)? })
}

fn add_vlan_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &mut RxFilters<R>,
) -> Result<NoResp, RxfError> {
    let req: VlanReq = env.copy_in_req()?;
    filters.vlan_add(req.vid);
    Ok(NoResp::default())
}

fn kill_vlan_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &mut RxFilters<R>,
) -> Result<NoResp, RxfError> {
    let req: VlanReq = env.copy_in_req()?;
    filters.vlan_kill(req.vid)?;
    Ok(NoResp::default())
}

fn reserve_filter_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &mut RxFilters<R>,
) -> Result<ReserveFilterResp, RxfError> {
    let req: ReserveFilterReq = env.copy_in_req()?;
    Ok(ReserveFilterResp { slot: filters.reserve(req.kind)? })
}

fn release_filter_hdlr<R: RegPort>(
    env: &IoctlEnvelope,
    filters: &mut RxFilters<R>,
) -> Result<NoResp, RxfError> {
    let req: ReleaseFilterReq = env.copy_in_req()?;
    filters.release(req.kind)?;
    Ok(NoResp::default())
}

/// Run one command against `filters`. This is the entry point for
/// every command: it checks the API version and then multiplexes the
/// command to its handler.
pub fn handle_cmd<R: RegPort>(
    filters: &mut RxFilters<R>,
    ioctl: &RxfCmdIoctl,
) -> RxfCmdResp {
    let env = match IoctlEnvelope::wrap(ioctl) {
        Ok(env) => env,
        Err(resp) => return resp,
    };

    match env.ioctl_cmd() {
        RxfCmd::InsertRule => {
            let resp = insert_rule_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::DeleteRule => {
            let resp = delete_rule_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::GetRule => {
            let resp = get_rule_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::ListRules => {
            let resp = list_rules_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::CountRules => {
            let resp: Result<RuleCountResp, _> = Ok(filters.count());
            hdlr_resp(&env, resp)
        }

        RxfCmd::RxRings => {
            let resp: Result<_, RxfError> =
                Ok(RxRingsResp { rx_rings: filters.rx_rings() });
            hdlr_resp(&env, resp)
        }

        RxfCmd::AddVlan => {
            let resp = add_vlan_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::KillVlan => {
            let resp = kill_vlan_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::ReserveFilter => {
            let resp = reserve_filter_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::ReleaseFilter => {
            let resp = release_filter_hdlr(&env, filters);
            hdlr_resp(&env, resp)
        }

        RxfCmd::Refresh => {
            filters.refresh();
            hdlr_resp(&env, Ok::<_, RxfError>(NoResp::default()))
        }

        RxfCmd::DumpFilters => {
            let resp: Result<DumpFiltersResp, RxfError> = Ok(filters.dump());
            hdlr_resp(&env, resp)
        }
    }
}

