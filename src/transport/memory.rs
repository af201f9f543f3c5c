// In-memory Transport
//
// A process-local mesh connecting nodes by address. Used by the test suite
// and by single-process demos; also the reference for what a real transport
// must provide. Unregistered or partitioned addresses fail with transport
// errors, which the failure detector treats like any other probe failure.

use crate::error::{Result, RingError};
use crate::protocol::{
    ForwardRequest, ForwardResponse, JoinRequest, JoinResponse, LeaveRequest, LeaveResponse,
    PingReqRequest, PingReqResponse, PingRequest, PingResponse,
};
use crate::transport::{ProtocolHandler, Transport};
use crate::Address;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// Responder for forwarded keyed requests, registered per address
pub type ForwardResponder = Arc<dyn Fn(ForwardRequest) -> ForwardResponse + Send + Sync>;

/// Shared registry of every node reachable in this process
#[derive(Default)]
pub struct MemoryMesh {
    handlers: DashMap<Address, Arc<dyn ProtocolHandler>>,
    responders: DashMap<Address, ForwardResponder>,
    partitioned: DashSet<Address>,
}

impl MemoryMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, address: Address, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.insert(address, handler);
    }

    pub fn register_forward(&self, address: Address, responder: ForwardResponder) {
        self.responders.insert(address, responder);
    }

    pub fn unregister(&self, address: &str) {
        self.handlers.remove(address);
        self.responders.remove(address);
    }

    /// Make an address unreachable without unregistering it
    pub fn partition(&self, address: &str) {
        self.partitioned.insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        self.partitioned.remove(address);
    }

    fn handler(&self, target: &Address) -> Result<Arc<dyn ProtocolHandler>> {
        if self.partitioned.contains(target.as_str()) {
            return Err(RingError::Transport(format!("{} is partitioned", target)));
        }
        self.handlers
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RingError::Transport(format!("{} is unreachable", target)))
    }
}

/// `Transport` implementation backed by a shared `MemoryMesh`
#[derive(Clone)]
pub struct MemoryTransport {
    mesh: Arc<MemoryMesh>,
}

impl MemoryTransport {
    pub fn new(mesh: Arc<MemoryMesh>) -> Self {
        Self { mesh }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn ping(&self, target: &Address, request: PingRequest) -> Result<PingResponse> {
        self.mesh.handler(target)?.handle_ping(request).await
    }

    async fn ping_req(
        &self,
        target: &Address,
        request: PingReqRequest,
    ) -> Result<PingReqResponse> {
        self.mesh.handler(target)?.handle_ping_req(request).await
    }

    async fn join(&self, target: &Address, request: JoinRequest) -> Result<JoinResponse> {
        self.mesh.handler(target)?.handle_join(request).await
    }

    async fn leave(&self, target: &Address, request: LeaveRequest) -> Result<LeaveResponse> {
        self.mesh.handler(target)?.handle_leave(request).await
    }

    async fn forward(
        &self,
        target: &Address,
        request: ForwardRequest,
    ) -> Result<ForwardResponse> {
        if self.mesh.partitioned.contains(target.as_str()) {
            return Err(RingError::Transport(format!("{} is partitioned", target)));
        }
        let responder = self
            .mesh
            .responders
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                RingError::Transport(format!("no forward responder at {}", target))
            })?;
        Ok(responder(request))
    }
}
