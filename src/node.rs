// Node Facade
//
// One `Node` per process: owns the member table, dissemination buffer, hash
// ring, suspicion timers, and the failure-detector task, and exposes the
// public surface — bootstrap, lookup, route-or-forward, events, stats, and
// teardown. All shared state lives behind a single lock; the lock is never
// held across transport calls or timer waits.

use crate::config::RingConfig;
use crate::error::{Result, RingError};
use crate::gossip::join::{self, AdminJoinOutcome, BootstrapSeeds};
use crate::gossip::{handlers, Gossip};
use crate::membership::dissemination::{Dissemination, PiggybackAdjustment};
use crate::membership::iterator::MemberIterator;
use crate::membership::suspicion::Suspicion;
use crate::membership::{Change, Member, MemberStatus, Membership, MembershipUpdate};
use crate::protocol::{
    ForwardRequest, ForwardResponse, JoinRequest, JoinResponse, LeaveRequest, LeaveResponse,
    PingReqRequest, PingReqResponse, PingRequest, PingResponse,
};
use crate::ring::HashRing;
use crate::stats::{NoopStats, StatsHook, StatsHookRegistry, StatsSink};
use crate::transport::{ProtocolHandler, Transport};
use crate::Address;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{timeout, Instant};

/// Ring mutation summary carried by `NodeEvent::RingChanged`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingChange {
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
}

/// Events observable through `Node::subscribe`
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Bootstrap finished; the node participates in the protocol
    Ready,

    /// One reconciled batch of membership updates
    Changed(Vec<MembershipUpdate>),

    /// The set of ring servers actually changed
    RingChanged(RingChange),

    /// The dissemination cap moved with the member count
    MaxPiggybackAdjusted(PiggybackAdjustment),
}

/// Outcome of `handle_or_proxy`
#[derive(Debug)]
pub enum RouteOutcome {
    /// The local node owns the key; the caller handles the request
    Local,

    /// The owning node answered through the transport
    Forwarded {
        owner: Address,
        response: ForwardResponse,
    },
}

/// One per-owner response from `handle_or_proxy_all`
#[derive(Debug)]
pub struct RoutedResponse {
    pub owner: Address,
    pub keys: Vec<String>,
    pub response: Result<ForwardResponse>,
}

/// Mutable protocol state, serialized under one lock
pub(crate) struct CoreState {
    pub(crate) membership: Membership,
    pub(crate) dissemination: Dissemination,
    pub(crate) ring: HashRing,
    pub(crate) iter: MemberIterator,
}

pub(crate) struct NodeInner {
    pub(crate) config: RingConfig,
    pub(crate) state: RwLock<CoreState>,
    pub(crate) suspicion: Suspicion,
    pub(crate) gossip: Gossip,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) stats: Arc<dyn StatsSink>,
    pub(crate) hooks: StatsHookRegistry,
    pub(crate) is_pinging: AtomicBool,
    listeners: RwLock<Vec<mpsc::Sender<NodeEvent>>>,
    destroyed: watch::Sender<bool>,
    ready: AtomicBool,
    self_weak: Weak<NodeInner>,
}

impl NodeInner {
    pub(crate) fn is_destroyed(&self) -> bool {
        *self.destroyed.borrow()
    }

    pub(crate) fn destroyed_rx(&self) -> watch::Receiver<bool> {
        self.destroyed.subscribe()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Reconcile a batch of changes and propagate the consequences: ring
    /// sync, dissemination, suspicion timers, stats, and events.
    pub(crate) async fn apply_changes(&self, changes: &[Change]) -> Vec<MembershipUpdate> {
        if changes.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();

        let (updates, ring_change, adjustment, member_count) = {
            let mut state = self.state.write().await;
            let members_before = state.membership.len();
            let updates = state.membership.update(changes);
            let local = state.membership.local_address().clone();

            let mut added = Vec::new();
            let mut removed = Vec::new();
            for update in &updates {
                let change = Change::from_member(&update.member).with_source(
                    update.source.clone().unwrap_or_else(|| local.clone()),
                );
                state.dissemination.record_change(change);

                if update.member.status == MemberStatus::Alive {
                    if state.ring.add_server(&update.member.address) {
                        added.push(update.member.address.clone());
                    }
                } else if state.ring.remove_server(&update.member.address) {
                    removed.push(update.member.address.clone());
                }
            }

            let member_count = state.membership.len();
            let adjustment = if member_count != members_before {
                state.dissemination.adjust_max_piggyback_count(member_count)
            } else {
                None
            };
            let ring_change = if added.is_empty() && removed.is_empty() {
                None
            } else {
                Some(RingChange { added, removed })
            };
            (updates, ring_change, adjustment, member_count)
        };

        if updates.is_empty() {
            return updates;
        }

        for update in &updates {
            if update.member.address != self.config.host_port {
                if update.member.status == MemberStatus::Suspect {
                    self.suspicion
                        .start(update.member.address.clone(), self.self_weak.clone());
                } else {
                    self.suspicion.cancel(&update.member.address);
                }
            }
            self.stats.count(
                &format!("membership-update.{}", update.kind.as_str()),
                1,
            );
        }
        self.stats.gauge("num-members", member_count as f64);
        self.stats.timing("updates", started.elapsed());

        if let Some(ring_change) = ring_change {
            self.emit(NodeEvent::RingChanged(ring_change)).await;
        }
        if let Some(adjustment) = adjustment {
            self.emit(NodeEvent::MaxPiggybackAdjusted(adjustment)).await;
        }
        self.emit(NodeEvent::Changed(updates.clone())).await;

        updates
    }

    /// Called by a fired suspicion timer; declares the member faulty if it
    /// is still suspect
    pub(crate) async fn convert_suspect_to_faulty(&self, address: &Address) {
        self.suspicion.clear(address);
        if self.is_destroyed() {
            return;
        }
        let pending = {
            let state = self.state.read().await;
            state
                .membership
                .get(address)
                .filter(|m| m.status == MemberStatus::Suspect)
                .map(|m| m.incarnation_number)
        };
        if let Some(incarnation) = pending {
            tracing::info!(
                node = %self.config.host_port,
                member = %address,
                "suspicion timeout elapsed, marking faulty"
            );
            self.apply_changes(&[Change::new(
                address.clone(),
                MemberStatus::Faulty,
                incarnation,
            )])
            .await;
        }
    }

    pub(crate) async fn emit(&self, event: NodeEvent) {
        let mut listeners = self.listeners.write().await;
        listeners.retain(|tx| !tx.is_closed());
        for tx in listeners.iter() {
            let _ = tx.send(event.clone()).await;
        }
    }
}

/// A cluster node; cheap to clone, all clones share the same state
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    pub fn new(config: RingConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_stats(config, transport, Arc::new(NoopStats))
    }

    pub fn with_stats(
        config: RingConfig,
        transport: Arc<dyn Transport>,
        stats: Arc<dyn StatsSink>,
    ) -> Result<Self> {
        config.validate()?;
        let (destroyed, _) = watch::channel(false);
        let inner = Arc::new_cyclic(|self_weak| NodeInner {
            state: RwLock::new(CoreState {
                membership: Membership::new(config.host_port.clone()),
                dissemination: Dissemination::new(),
                ring: HashRing::new(config.ring_replica_points),
                iter: MemberIterator::new(),
            }),
            suspicion: Suspicion::new(config.suspicion_timeout),
            gossip: Gossip::new(),
            transport,
            stats,
            hooks: StatsHookRegistry::new(),
            is_pinging: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            destroyed,
            ready: AtomicBool::new(false),
            self_weak: self_weak.clone(),
            config,
        });
        Ok(Self { inner })
    }

    /// Local address
    pub fn whoami(&self) -> &Address {
        &self.inner.config.host_port
    }

    pub fn app(&self) -> &str {
        &self.inner.config.app
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Join the cluster through the given seeds and start the protocol
    pub async fn bootstrap(&self, seeds: impl Into<BootstrapSeeds>) -> Result<Vec<Address>> {
        let joined = join::bootstrap(&self.inner, seeds.into()).await?;
        if self.inner.is_destroyed() {
            return Err(RingError::DestroyedDuringBootstrap);
        }
        self.inner.ready.store(true, Ordering::SeqCst);
        self.inner.gossip.start(self.inner.clone());
        self.inner.emit(NodeEvent::Ready).await;
        tracing::info!(
            node = %self.whoami(),
            joined = joined.len(),
            "bootstrap complete"
        );
        Ok(joined)
    }

    /// Owner of `key`; the local address when the ring is empty
    pub async fn lookup(&self, key: &str) -> Address {
        self.inner.stats.count("lookup", 1);
        let state = self.inner.state.read().await;
        state
            .ring
            .lookup(key)
            .cloned()
            .unwrap_or_else(|| self.whoami().clone())
    }

    /// Route a keyed request: `Local` when this node owns the key, otherwise
    /// forward it to the owner and return its response
    pub async fn handle_or_proxy(
        &self,
        key: &str,
        request: ForwardRequest,
    ) -> Result<RouteOutcome> {
        let owner = self.lookup(key).await;
        if owner == *self.whoami() {
            return Ok(RouteOutcome::Local);
        }
        let response = timeout(
            self.inner.config.proxy_req_timeout,
            self.inner.transport.forward(&owner, request),
        )
        .await
        .map_err(|_| RingError::Timeout(format!("forward to {}", owner)))??;
        Ok(RouteOutcome::Forwarded { owner, response })
    }

    /// Route a batch of keys: the local group is served by `local_handler`,
    /// each remote owner gets one forwarded request, all gathered
    /// concurrently
    pub async fn handle_or_proxy_all<F>(
        &self,
        keys: Vec<String>,
        endpoint: &str,
        payload: serde_json::Value,
        local_handler: F,
    ) -> Vec<RoutedResponse>
    where
        F: FnOnce(&[String]) -> ForwardResponse,
    {
        let local = self.whoami().clone();
        let mut groups: BTreeMap<Address, Vec<String>> = BTreeMap::new();
        {
            self.inner.stats.count("lookup", keys.len() as i64);
            let state = self.inner.state.read().await;
            for key in keys {
                let owner = state.ring.lookup(&key).cloned().unwrap_or_else(|| local.clone());
                groups.entry(owner).or_default().push(key);
            }
        }

        let mut responses = Vec::with_capacity(groups.len());
        if let Some(group) = groups.remove(&local) {
            let response = local_handler(&group);
            responses.push(RoutedResponse {
                owner: local,
                keys: group,
                response: Ok(response),
            });
        }

        let dispatches = groups.into_iter().map(|(owner, group)| {
            let inner = self.inner.clone();
            let request = ForwardRequest {
                keys: group.clone(),
                endpoint: endpoint.to_string(),
                payload: payload.clone(),
            };
            async move {
                let response = match timeout(
                    inner.config.proxy_req_timeout,
                    inner.transport.forward(&owner, request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RingError::Timeout(format!("forward to {}", owner))),
                };
                RoutedResponse {
                    owner,
                    keys: group,
                    response,
                }
            }
        });
        responses.extend(futures::future::join_all(dispatches).await);
        responses
    }

    /// Subscribe to node events; the receiver sees every event emitted after
    /// this call
    pub async fn subscribe(&self) -> mpsc::Receiver<NodeEvent> {
        let (tx, rx) = mpsc::channel(128);
        self.inner.listeners.write().await.push(tx);
        rx
    }

    /// Leave the cluster but keep serving lookups; peers learn via gossip
    pub async fn admin_leave(&self) -> Result<()> {
        let (incarnation, status) = {
            let state = self.inner.state.read().await;
            let local = state.membership.local_member().ok_or_else(|| {
                RingError::Lifecycle("local member not added; bootstrap first".to_string())
            })?;
            (local.incarnation_number, local.status)
        };
        if status == MemberStatus::Leave {
            return Err(RingError::Lifecycle("node has already left".to_string()));
        }

        self.inner
            .apply_changes(&[Change::new(
                self.whoami().clone(),
                MemberStatus::Leave,
                incarnation,
            )])
            .await;
        self.inner.gossip.stop();
        self.inner.suspicion.stop_all();
        tracing::info!(node = %self.whoami(), "left the cluster");
        Ok(())
    }

    /// Rejoin after a leave, or run a fresh join fan-out against the known
    /// members otherwise
    pub async fn admin_join(&self) -> Result<AdminJoinOutcome> {
        let (address, incarnation, status) = {
            let state = self.inner.state.read().await;
            let local = state.membership.local_member().ok_or_else(|| {
                RingError::Lifecycle("local member not added; bootstrap first".to_string())
            })?;
            (
                local.address.clone(),
                local.incarnation_number,
                local.status,
            )
        };

        if status == MemberStatus::Leave {
            self.inner
                .apply_changes(&[Change::new(
                    address,
                    MemberStatus::Alive,
                    incarnation + 1,
                )])
                .await;
            self.inner.suspicion.reenable();
            self.inner.gossip.start(self.inner.clone());
            tracing::info!(node = %self.whoami(), "rejoined the cluster");
            return Ok(AdminJoinOutcome::Rejoined);
        }

        let hosts: Vec<Address> = {
            let state = self.inner.state.read().await;
            state
                .membership
                .get_state()
                .into_iter()
                .map(|m| m.address)
                .collect()
        };
        let joined = join::join_fanout(&self.inner, &hosts).await?;
        Ok(AdminJoinOutcome::Joined(joined))
    }

    /// Stop the protocol and release every background task; idempotent
    pub async fn destroy(&self) {
        let was_destroyed = self.inner.destroyed.send_replace(true);
        if was_destroyed {
            return;
        }
        self.inner.gossip.stop();
        self.inner.suspicion.stop_all();
        self.inner.listeners.write().await.clear();
        tracing::info!(node = %self.whoami(), "node destroyed");
    }

    /// Register a named stats provider surfaced through `get_stats`
    pub fn register_stats_hook(&self, name: &str, hook: Arc<dyn StatsHook>) -> Result<()> {
        self.inner.hooks.register(name, hook)
    }

    /// Point-in-time diagnostic snapshot
    pub async fn get_stats(&self) -> serde_json::Value {
        let (members, checksum, servers) = {
            let state = self.inner.state.read().await;
            (
                state.membership.get_state(),
                state.membership.checksum(),
                state.ring.servers(),
            )
        };
        serde_json::json!({
            "app": self.inner.config.app,
            "hostPort": self.inner.config.host_port,
            "ready": self.is_ready(),
            "membership": { "checksum": checksum, "members": members },
            "ring": { "servers": servers },
            "hooks": self.inner.hooks.collect(),
        })
    }

    /// Snapshot of every known member
    pub async fn members(&self) -> Vec<Member> {
        self.inner.state.read().await.membership.get_state()
    }

    pub async fn member_count(&self) -> usize {
        self.inner.state.read().await.membership.len()
    }

    pub async fn membership_checksum(&self) -> u32 {
        self.inner.state.read().await.membership.checksum()
    }

    pub async fn ring_servers(&self) -> Vec<Address> {
        self.inner.state.read().await.ring.servers()
    }
}

#[async_trait]
impl ProtocolHandler for Node {
    async fn handle_ping(&self, request: PingRequest) -> Result<PingResponse> {
        handlers::handle_ping(&self.inner, request).await
    }

    async fn handle_ping_req(&self, request: PingReqRequest) -> Result<PingReqResponse> {
        handlers::handle_ping_req(&self.inner, request).await
    }

    async fn handle_join(&self, request: JoinRequest) -> Result<JoinResponse> {
        handlers::handle_join(&self.inner, request).await
    }

    async fn handle_leave(&self, request: LeaveRequest) -> Result<LeaveResponse> {
        handlers::handle_leave(&self.inner, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryMesh, MemoryTransport};
    use std::time::Duration;

    fn test_config(app: &str, host: &str) -> RingConfig {
        RingConfig {
            min_protocol_period: Duration::from_millis(20),
            ..RingConfig::new(app, host)
        }
    }

    fn test_node(app: &str, host: &str, mesh: &Arc<MemoryMesh>) -> Node {
        let transport = Arc::new(MemoryTransport::new(mesh.clone()));
        let node = Node::new(test_config(app, host), transport).unwrap();
        mesh.register(host.to_string(), Arc::new(node.clone()));
        node
    }

    fn ping_with(changes: Vec<Change>) -> PingRequest {
        PingRequest {
            source: "127.0.0.1:9999".to_string(),
            checksum: 1,
            changes,
        }
    }

    #[tokio::test]
    async fn test_lookup_on_empty_ring_returns_local() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        assert_eq!(node.lookup("any-key").await, "127.0.0.1:3000");
    }

    #[tokio::test]
    async fn test_first_observation_as_faulty_stays_off_the_ring() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);

        node.handle_ping(ping_with(vec![Change::new(
            "127.0.0.1:3001".to_string(),
            MemberStatus::Faulty,
            1,
        )]))
        .await
        .unwrap();

        assert_eq!(node.member_count().await, 1);
        assert!(node.ring_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_ring_tracks_alive_set() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let peer = "127.0.0.1:3001".to_string();

        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Alive,
            1,
        )]))
        .await
        .unwrap();
        assert_eq!(node.ring_servers().await, vec![peer.clone()]);

        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Suspect,
            1,
        )]))
        .await
        .unwrap();
        assert!(node.ring_servers().await.is_empty());

        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Alive,
            2,
        )]))
        .await
        .unwrap();
        assert_eq!(node.ring_servers().await, vec![peer]);
    }

    #[tokio::test]
    async fn test_lookup_stable_under_suspect_churn() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let peer = "127.0.0.1:3001".to_string();
        node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap();

        let owners_before: Vec<Address> = {
            let mut owners = Vec::new();
            for i in 0..50 {
                owners.push(node.lookup(&format!("key{}", i)).await);
            }
            owners
        };

        // a member that arrives suspect and later turns faulty never joins
        // the alive set, so no key moves
        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Suspect,
            1,
        )]))
        .await
        .unwrap();
        node.handle_ping(ping_with(vec![Change::new(peer, MemberStatus::Faulty, 1)]))
            .await
            .unwrap();

        for (i, before) in owners_before.iter().enumerate() {
            assert_eq!(node.lookup(&format!("key{}", i)).await, *before);
        }
        node.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspect_converts_to_faulty_after_timeout() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let peer = "127.0.0.1:3001".to_string();
        let mut events = node.subscribe().await;

        // peer is alive, then suspected
        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Alive,
            1,
        )]))
        .await
        .unwrap();
        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Suspect,
            1,
        )]))
        .await
        .unwrap();
        assert_eq!(node.inner.suspicion.timer_count(), 1);

        // drain the events emitted so far
        while let Ok(event) = events.try_recv() {
            drop(event);
        }

        tokio::time::sleep(node.inner.config.suspicion_timeout + Duration::from_millis(50)).await;

        let members = node.members().await;
        assert_eq!(members[0].status, MemberStatus::Faulty);
        assert!(node.ring_servers().await.is_empty());

        // the conversion surfaced as a changed event
        let mut saw_faulty = false;
        while let Ok(event) = events.try_recv() {
            if let NodeEvent::Changed(updates) = event {
                saw_faulty |= updates
                    .iter()
                    .any(|u| u.member.status == MemberStatus::Faulty);
            }
        }
        assert!(saw_faulty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refutation_cancels_suspicion_timer() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let peer = "127.0.0.1:3001".to_string();

        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Suspect,
            1,
        )]))
        .await
        .unwrap();
        assert_eq!(node.inner.suspicion.timer_count(), 1);

        // the member refutes before the timeout
        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Alive,
            2,
        )]))
        .await
        .unwrap();
        assert_eq!(node.inner.suspicion.timer_count(), 0);

        tokio::time::sleep(node.inner.config.suspicion_timeout * 2).await;
        let members = node.members().await;
        assert_eq!(members[0].status, MemberStatus::Alive);
    }

    #[tokio::test]
    async fn test_local_refutes_suspicion_in_ping_response() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap();
        let incarnation = node.members().await[0].incarnation_number;

        let response = node
            .handle_ping(ping_with(vec![Change::new(
                "127.0.0.1:3000".to_string(),
                MemberStatus::Suspect,
                incarnation,
            )]))
            .await
            .unwrap();

        let local = node.members().await[0].clone();
        assert_eq!(local.status, MemberStatus::Alive);
        assert_eq!(local.incarnation_number, incarnation + 1);

        // the refutation rides back on the same response
        assert!(response.changes.iter().any(|c| {
            c.address == "127.0.0.1:3000"
                && c.status == MemberStatus::Alive
                && c.incarnation_number == incarnation + 1
        }));
        node.destroy().await;
    }

    #[tokio::test]
    async fn test_handle_or_proxy_routes_remote_keys() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let peer = "127.0.0.1:3001".to_string();
        // the peer answers pings so the detector keeps it alive
        let _peer_node = test_node("mars", &peer, &mesh);
        node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap();

        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Alive,
            1,
        )]))
        .await
        .unwrap();
        mesh.register_forward(
            peer.clone(),
            Arc::new(|request: ForwardRequest| ForwardResponse {
                status: 200,
                payload: serde_json::json!({ "echo": request.keys }),
            }),
        );

        // find one key for each owner
        let mut local_key = None;
        let mut remote_key = None;
        for i in 0..200 {
            let key = format!("key{}", i);
            if node.lookup(&key).await == *node.whoami() {
                local_key.get_or_insert(key);
            } else {
                remote_key.get_or_insert(key);
            }
            if local_key.is_some() && remote_key.is_some() {
                break;
            }
        }

        let request = ForwardRequest {
            keys: vec![],
            endpoint: "/op".to_string(),
            payload: serde_json::Value::Null,
        };
        match node
            .handle_or_proxy(&local_key.unwrap(), request.clone())
            .await
            .unwrap()
        {
            RouteOutcome::Local => {}
            other => panic!("expected local handling, got {:?}", other),
        }
        match node
            .handle_or_proxy(&remote_key.unwrap(), request)
            .await
            .unwrap()
        {
            RouteOutcome::Forwarded { owner, response } => {
                assert_eq!(owner, peer);
                assert_eq!(response.status, 200);
            }
            other => panic!("expected forwarding, got {:?}", other),
        }
        node.destroy().await;
    }

    #[tokio::test]
    async fn test_handle_or_proxy_all_groups_by_owner() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let peer = "127.0.0.1:3001".to_string();
        let _peer_node = test_node("mars", &peer, &mesh);
        node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap();
        node.handle_ping(ping_with(vec![Change::new(
            peer.clone(),
            MemberStatus::Alive,
            1,
        )]))
        .await
        .unwrap();
        mesh.register_forward(
            peer.clone(),
            Arc::new(|request: ForwardRequest| ForwardResponse {
                status: 200,
                payload: serde_json::json!({ "count": request.keys.len() }),
            }),
        );

        let keys: Vec<String> = (0..40).map(|i| format!("key{}", i)).collect();
        let responses = node
            .handle_or_proxy_all(keys.clone(), "/op", serde_json::Value::Null, |group| {
                ForwardResponse {
                    status: 200,
                    payload: serde_json::json!({ "count": group.len() }),
                }
            })
            .await;

        let total: usize = responses
            .iter()
            .map(|r| r.keys.len())
            .sum();
        assert_eq!(total, keys.len());
        assert!(responses.iter().all(|r| r.response.is_ok()));
        // both owners appear with 100 replica points over 40 keys
        assert_eq!(responses.len(), 2);
        node.destroy().await;
    }

    #[tokio::test]
    async fn test_leave_request_is_acknowledged_without_state_change() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        node.handle_ping(ping_with(vec![Change::new(
            "127.0.0.1:3001".to_string(),
            MemberStatus::Alive,
            1,
        )]))
        .await
        .unwrap();
        let checksum = node.membership_checksum().await;

        node.handle_leave(LeaveRequest {
            source: "127.0.0.1:3001".to_string(),
        })
        .await
        .unwrap();

        // the leaver's own gossip carries the status; the ack changes nothing
        assert_eq!(node.membership_checksum().await, checksum);
        assert_eq!(
            node.members().await[0].status,
            MemberStatus::Alive
        );
    }

    #[tokio::test]
    async fn test_ready_event_follows_bootstrap() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let mut events = node.subscribe().await;
        node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap();

        let mut saw_ready = false;
        while let Ok(event) = events.try_recv() {
            saw_ready |= matches!(event, NodeEvent::Ready);
        }
        assert!(saw_ready);
        node.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_stops_gossip() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap();
        assert!(node.inner.gossip.is_running());

        node.destroy().await;
        assert!(node.is_destroyed());
        assert!(!node.inner.gossip.is_running());
        node.destroy().await;
        assert!(node.is_destroyed());
    }

    #[tokio::test]
    async fn test_bootstrap_twice_is_a_lifecycle_error() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap();
        let err = node.bootstrap(vec!["127.0.0.1:3000"]).await.unwrap_err();
        assert!(matches!(err, RingError::Lifecycle(_)));
        node.destroy().await;
    }

    #[tokio::test]
    async fn test_piggyback_adjustment_fires_on_growth_only() {
        let mesh = MemoryMesh::new();
        let node = test_node("mars", "127.0.0.1:3000", &mesh);
        let mut events = node.subscribe().await;

        // 1 member: cap stays at the initial value, no event
        node.handle_ping(ping_with(vec![Change::new(
            "127.0.0.1:3001".to_string(),
            MemberStatus::Alive,
            1,
        )]))
        .await
        .unwrap();

        // growing the member set moves the cap
        for port in 3002..3005 {
            node.handle_ping(ping_with(vec![Change::new(
                format!("127.0.0.1:{}", port),
                MemberStatus::Alive,
                1,
            )]))
            .await
            .unwrap();
        }

        let mut adjustments = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let NodeEvent::MaxPiggybackAdjusted(adjustment) = event {
                adjustments.push(adjustment);
            }
        }
        assert!(!adjustments.is_empty());

        // status churn among existing members never adjusts the cap
        node.handle_ping(ping_with(vec![Change::new(
            "127.0.0.1:3001".to_string(),
            MemberStatus::Suspect,
            1,
        )]))
        .await
        .unwrap();
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, NodeEvent::MaxPiggybackAdjusted(_)));
        }
        node.destroy().await;
    }
}
