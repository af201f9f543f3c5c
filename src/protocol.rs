// Wire Messages
//
// Transport-neutral request/response bodies for the gossip protocol. The
// concrete transport only moves these as JSON; field names on the wire are
// camelCase. Piggybacked membership changes ride on every message.

use crate::membership::{Change, Member};
use crate::Address;
use serde::{Deserialize, Serialize};

/// Direct probe of a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    pub source: Address,
    pub checksum: u32,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub changes: Vec<Change>,
}

/// Indirect probe: asks the receiver to ping `target` on our behalf
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReqRequest {
    pub source: Address,
    pub target: Address,
    pub checksum: u32,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReqResponse {
    pub ping_status: bool,
    pub target: Address,
    pub changes: Vec<Change>,
}

/// Request to join a cluster through one of its members
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub app: String,
    pub source: Address,
    pub incarnation_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub app: String,
    pub coordinator: Address,
    pub membership: Vec<Member>,
}

/// Courtesy notification that the sender is leaving; carries no state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub source: Address,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {}

/// Keyed request handed off to the node that owns the keys
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub keys: Vec<String>,
    pub endpoint: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardResponse {
    pub status: u16,
    pub payload: serde_json::Value,
}
