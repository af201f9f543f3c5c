// Inbound Protocol Handlers
//
// The server side of the gossip protocol. Every handler first merges the
// piggybacked changes from the request, then does its own work. Handlers
// run on the transport's tasks, concurrently with the local failure
// detector; none of them holds membership state across a transport call.

use crate::error::{Result, RingError};
use crate::membership::{Change, MemberStatus};
use crate::node::NodeInner;
use crate::protocol::{
    JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, PingReqRequest, PingReqResponse,
    PingRequest, PingResponse,
};
use std::sync::Arc;
use tokio::time::{timeout, Instant};

pub(crate) async fn handle_ping(
    node: &Arc<NodeInner>,
    request: PingRequest,
) -> Result<PingResponse> {
    node.stats.count("ping.recv", 1);
    if node.is_destroyed() {
        return Err(RingError::Lifecycle("node is destroyed".to_string()));
    }

    node.apply_changes(&request.changes).await;

    let mut state = node.state.write().await;
    let checksum = state.membership.checksum();
    let changes =
        state
            .dissemination
            .issue_changes(Some(request.checksum), Some(&request.source), checksum);
    Ok(PingResponse { changes })
}

pub(crate) async fn handle_ping_req(
    node: &Arc<NodeInner>,
    request: PingReqRequest,
) -> Result<PingReqResponse> {
    node.stats.count("ping-req.recv", 1);
    if node.is_destroyed() {
        return Err(RingError::Lifecycle("node is destroyed".to_string()));
    }

    node.apply_changes(&request.changes).await;

    // probe the target on the requester's behalf
    let probe = {
        let mut state = node.state.write().await;
        let checksum = state.membership.checksum();
        PingRequest {
            source: state.membership.local_address().clone(),
            checksum,
            changes: state
                .dissemination
                .issue_changes(None, Some(&request.target), checksum),
        }
    };

    let started = Instant::now();
    let ping_status = match timeout(
        node.config.ping_timeout,
        node.transport.ping(&request.target, probe),
    )
    .await
    {
        Ok(Ok(response)) => {
            node.apply_changes(&response.changes).await;
            true
        }
        _ => false,
    };
    node.stats.timing("ping-req", started.elapsed());

    let mut state = node.state.write().await;
    let checksum = state.membership.checksum();
    let changes =
        state
            .dissemination
            .issue_changes(Some(request.checksum), Some(&request.source), checksum);
    Ok(PingReqResponse {
        ping_status,
        target: request.target,
        changes,
    })
}

pub(crate) async fn handle_join(
    node: &Arc<NodeInner>,
    request: JoinRequest,
) -> Result<JoinResponse> {
    node.stats.count("join.recv", 1);
    if node.is_destroyed() {
        return Err(RingError::Lifecycle("node is destroyed".to_string()));
    }
    if request.source == node.config.host_port {
        return Err(RingError::InvalidJoinSource(request.source));
    }
    if request.app != node.config.app {
        return Err(RingError::InvalidJoinApp {
            expected: node.config.app.clone(),
            actual: request.app,
        });
    }
    if crate::config::split_host_port(&request.source).is_none() {
        return Err(RingError::Protocol(format!(
            "join source {:?} is not host:port",
            request.source
        )));
    }

    node.apply_changes(&[Change::new(
        request.source.clone(),
        MemberStatus::Alive,
        request.incarnation_number,
    )
    .with_source(request.source.clone())])
    .await;

    let membership = {
        let state = node.state.read().await;
        state.membership.get_state()
    };

    tracing::info!(
        node = %node.config.host_port,
        joiner = %request.source,
        "accepted join"
    );

    Ok(JoinResponse {
        app: node.config.app.clone(),
        coordinator: node.config.host_port.clone(),
        membership,
    })
}

// Leaving is announced through the leaver's own gossip; this handler only
// acknowledges.
pub(crate) async fn handle_leave(
    node: &Arc<NodeInner>,
    request: LeaveRequest,
) -> Result<LeaveResponse> {
    tracing::debug!(
        node = %node.config.host_port,
        leaver = %request.source,
        "leave acknowledged"
    );
    Ok(LeaveResponse::default())
}
