// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::API_VERSION;
use super::FilterKind;
use super::Generation;
use super::flow::FlowRule;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use libc::c_int;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(C)]
pub enum RxfCmd {
    InsertRule = 1,     // insert a classification rule
    DeleteRule = 2,     // delete the rule at a location
    GetRule = 3,        // read back the rule at a location
    ListRules = 4,      // list enabled rule locations
    CountRules = 5,     // count enabled rules and total capacity
    RxRings = 6,        // number of active receive rings
    AddVlan = 10,       // a VLAN subinterface was created
    KillVlan = 11,      // a VLAN subinterface was destroyed
    ReserveFilter = 20, // carve a slot out for the forwarding path
    ReleaseFilter = 21, // give a reserved slot back
    Refresh = 30,       // rewrite all filter registers from memory
    DumpFilters = 31,   // dump slots, pools, and VLAN state
}

impl TryFrom<c_int> for RxfCmd {
    type Error = ();

    fn try_from(num: c_int) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(Self::InsertRule),
            2 => Ok(Self::DeleteRule),
            3 => Ok(Self::GetRule),
            4 => Ok(Self::ListRules),
            5 => Ok(Self::CountRules),
            6 => Ok(Self::RxRings),
            10 => Ok(Self::AddVlan),
            11 => Ok(Self::KillVlan),
            20 => Ok(Self::ReserveFilter),
            21 => Ok(Self::ReleaseFilter),
            30 => Ok(Self::Refresh),
            31 => Ok(Self::DumpFilters),
            _ => Err(()),
        }
    }
}

/// A command sent across the control channel.
///
/// The request body is the postcard encoding of the command's request
/// type, or empty for commands that take no request.
#[derive(Debug)]
pub struct RxfCmdIoctl {
    pub api_version: u64,
    pub cmd: RxfCmd,
    pub req_bytes: Vec<u8>,
    /// The largest response the caller is willing to accept.
    pub resp_len: usize,
}

impl RxfCmdIoctl {
    pub fn new(cmd: RxfCmd, req_bytes: Vec<u8>, resp_len: usize) -> Self {
        Self { api_version: API_VERSION, cmd, req_bytes, resp_len }
    }

    /// Is this the expected API version?
    pub fn check_version(&self) -> bool {
        self.api_version == API_VERSION
    }
}

/// The reply to an [`RxfCmdIoctl`].
///
/// On success `errno` is zero and `resp_bytes` holds the encoded
/// response. On failure `errno` is non-zero and `resp_bytes` holds an
/// encoded [`RxfError`], when one could be produced.
#[derive(Debug, Default)]
pub struct RxfCmdResp {
    pub errno: c_int,
    pub resp_bytes: Vec<u8>,
}

impl RxfCmdResp {
    pub fn cmd_err_resp(&self) -> Option<RxfError> {
        if self.errno == 0 {
            return None;
        }

        match postcard::from_bytes(&self.resp_bytes) {
            Ok(cmd_err) => Some(cmd_err),
            Err(deser_err) => Some(RxfError::DeserCmdErr(deser_err.to_string())),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RxfError {
    BadApiVersion {
        user: u64,
        kernel: u64,
    },
    /// The request cannot be satisfied in the device's current state,
    /// such as an unbalanced reserve/release.
    BadState(String),
    /// The caller's buffer cannot hold every enabled rule location.
    CapacityTooSmall {
        needed: u32,
        given: u32,
    },
    /// Inserting the rule would silently stop delivery for a live VLAN
    /// subinterface.
    ConflictingOverride {
        location: u32,
        old_vid: u16,
        new_vid: u16,
    },
    DeserCmdErr(String),
    DeserCmdReq(String),
    /// The VLAN ID is already filtered by another slot.
    DuplicateRule {
        location: u32,
        existing: u32,
        vid: u16,
    },
    InvalidCfg(String),
    /// The location lies outside every category, or names a slot
    /// that holds no rule.
    InvalidLocation(u32),
    /// Unsupported flow type, partial mask, or disallowed field
    /// combination.
    MalformedRule(String),

    /// The command expects a request body but none was sent.
    NoRequestBody,

    /// No free entry remains in a shared atom or tag pool.
    PoolExhausted(String),
    QueueOutOfRange(u32),
    QueueReservedFieldSet(u8),
    RespTooLarge {
        needed: usize,
        given: usize,
    },
    /// The slot exists but holds no rule.
    RuleNotFound(u32),
    SerCmdErr(String),
    SerCmdResp(String),
    /// No free slot for the rule.
    TableFull {
        kind: FilterKind,
        location: u32,
    },
    /// A VLAN kill for an ID that was never added.
    UnknownVlan(u16),
}

impl RxfError {
    /// Convert to an errno value.
    ///
    /// NOTE: Only `RespTooLarge` may use `ENOBUFS`; clients rely on it
    /// to size their response buffer.
    pub fn to_errno(&self) -> c_int {
        use libc::*;

        match self {
            Self::BadApiVersion { .. } => EPROTO,
            Self::BadState(_) => EINVAL,
            Self::CapacityTooSmall { .. } => EMSGSIZE,
            Self::ConflictingOverride { .. } => EINVAL,
            Self::DeserCmdErr(_) => ENOMSG,
            Self::DeserCmdReq(_) => ENOMSG,
            Self::DuplicateRule { .. } => EEXIST,
            Self::InvalidCfg(_) => EINVAL,
            Self::InvalidLocation(_) => EINVAL,
            Self::MalformedRule(_) => EINVAL,
            Self::NoRequestBody => EINVAL,
            Self::PoolExhausted(_) => ENOSPC,
            Self::QueueOutOfRange(_) => EINVAL,
            Self::QueueReservedFieldSet(_) => EINVAL,
            Self::RespTooLarge { .. } => ENOBUFS,
            Self::RuleNotFound(_) => ENOENT,
            Self::SerCmdErr(_) => ENOMSG,
            Self::SerCmdResp(_) => ENOMSG,
            Self::TableFull { .. } => ENOSPC,
            Self::UnknownVlan(_) => EINVAL,
        }
    }
}

impl Display for RxfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadApiVersion { user, kernel } => {
                write!(f, "API version mismatch: user {user}, device {kernel}")
            }
            Self::BadState(msg) => write!(f, "bad state: {msg}"),
            Self::CapacityTooSmall { needed, given } => {
                write!(f, "capacity {given} too small, need {needed}")
            }
            Self::ConflictingOverride { location, old_vid, new_vid } => write!(
                f,
                "can't overwrite VLAN subinterface filter @{location} \
                 VID {old_vid} with VID {new_vid}"
            ),
            Self::DeserCmdErr(msg) => {
                write!(f, "failed to deserialize command error: {msg}")
            }
            Self::DeserCmdReq(msg) => {
                write!(f, "failed to deserialize command request: {msg}")
            }
            Self::DuplicateRule { location, existing, vid } => write!(
                f,
                "duplicate VLAN filter for VID {vid} @{location} \
                 (existing @{existing})"
            ),
            Self::InvalidCfg(msg) => write!(f, "invalid config: {msg}"),
            Self::InvalidLocation(loc) => write!(f, "invalid location {loc}"),
            Self::MalformedRule(msg) => write!(f, "malformed rule: {msg}"),
            Self::NoRequestBody => write!(f, "no request body"),
            Self::PoolExhausted(pool) => write!(f, "{pool} pool exhausted"),
            Self::QueueOutOfRange(ring) => {
                write!(f, "invalid rx filter queue {ring}")
            }
            Self::QueueReservedFieldSet(vf) => {
                write!(f, "rx filter queue VF must be zero, got {vf}")
            }
            Self::RespTooLarge { needed, given } => {
                write!(f, "response needs {needed} bytes, given {given}")
            }
            Self::RuleNotFound(loc) => write!(f, "no rule at location {loc}"),
            Self::SerCmdErr(msg) => {
                write!(f, "failed to serialize command error: {msg}")
            }
            Self::SerCmdResp(msg) => {
                write!(f, "failed to serialize command response: {msg}")
            }
            Self::TableFull { kind, location } => {
                write!(f, "{kind} table full at location {location}")
            }
            Self::UnknownVlan(vid) => write!(f, "VLAN {vid} not active"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RxfError {}

/// A marker trait indicating a success response type that is returned
/// from a command and may be passed across the control channel.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// Indicates no meaningful response value on success.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NoResp {
    pub unused: u64,
}

impl CmdOk for NoResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct InsertRuleReq {
    pub rule: FlowRule,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InsertRuleResp {
    /// The location the rule landed on. For [`RuleLocation::Any`]
    /// inserts this is the only way to learn it.
    ///
    /// [`RuleLocation::Any`]: super::flow::RuleLocation::Any
    pub location: u32,
}

impl CmdOk for InsertRuleResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeleteRuleReq {
    pub location: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetRuleReq {
    pub location: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetRuleResp {
    pub rule: FlowRule,
}

impl CmdOk for GetRuleResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListRulesReq {
    pub capacity: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListRulesResp {
    pub locations: Vec<u32>,
}

impl CmdOk for ListRulesResp {}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RuleCountResp {
    /// Enabled rules across all categories.
    pub count: u32,
    /// Total slots across all categories.
    pub max: u32,
    /// Whether [`RuleLocation::Any`] is accepted on insert.
    ///
    /// [`RuleLocation::Any`]: super::flow::RuleLocation::Any
    pub special_locations: bool,
}

impl CmdOk for RuleCountResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct RxRingsResp {
    pub rx_rings: u32,
}

impl CmdOk for RxRingsResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct VlanReq {
    pub vid: u16,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReserveFilterReq {
    pub kind: FilterKind,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReserveFilterResp {
    /// The reserved slot index within the category.
    pub slot: u32,
}

impl CmdOk for ReserveFilterResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReleaseFilterReq {
    pub kind: FilterKind,
}

/// One enabled filter slot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SlotDump {
    pub kind: FilterKind,
    pub index: u32,
    pub rule: FlowRule,
    /// Generation-2 tag or atom references held by the slot, if any.
    pub binding: Option<String>,
}

/// One live entry of a shared pool.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PoolEntryDump {
    pub index: u32,
    pub usage: u32,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PoolDump {
    pub name: String,
    pub size: u32,
    pub entries: Vec<PoolEntryDump>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VlanStateDump {
    /// VLAN IDs of live subinterfaces.
    pub active_vids: Vec<u16>,
    /// Live VLAN IDs with no filter slot.
    pub overflow: u32,
    pub promisc: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DumpFiltersResp {
    pub generation: Generation,
    pub slots: Vec<SlotDump>,
    pub pools: Vec<PoolDump>,
    pub vlan: VlanStateDump,
}

impl CmdOk for DumpFiltersResp {}
