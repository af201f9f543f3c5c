// Transport Seam
//
// The core never talks to the network directly. Outbound calls go through
// the `Transport` trait the embedding application implements; inbound
// requests are served by the node's `ProtocolHandler` implementation. The
// in-memory transport in `memory` wires both together for tests and
// single-process clusters.

use crate::error::Result;
use crate::protocol::{
    ForwardRequest, ForwardResponse, JoinRequest, JoinResponse, LeaveRequest, LeaveResponse,
    PingReqRequest, PingReqResponse, PingRequest, PingResponse,
};
use crate::Address;
use async_trait::async_trait;

pub mod memory;

pub use memory::{MemoryMesh, MemoryTransport};

/// Outbound protocol calls; one implementation per RPC stack
#[async_trait]
pub trait Transport: Send + Sync {
    async fn ping(&self, target: &Address, request: PingRequest) -> Result<PingResponse>;

    async fn ping_req(&self, target: &Address, request: PingReqRequest)
        -> Result<PingReqResponse>;

    async fn join(&self, target: &Address, request: JoinRequest) -> Result<JoinResponse>;

    async fn leave(&self, target: &Address, request: LeaveRequest) -> Result<LeaveResponse>;

    /// Hand a keyed request to the node that owns it
    async fn forward(&self, target: &Address, request: ForwardRequest) -> Result<ForwardResponse>;
}

/// Inbound protocol requests served by every node
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    async fn handle_ping(&self, request: PingRequest) -> Result<PingResponse>;

    async fn handle_ping_req(&self, request: PingReqRequest) -> Result<PingReqResponse>;

    async fn handle_join(&self, request: JoinRequest) -> Result<JoinResponse>;

    async fn handle_leave(&self, request: LeaveRequest) -> Result<LeaveResponse>;
}
