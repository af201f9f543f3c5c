// Failure Detection
//
// The protocol-period loop at the heart of the gossip protocol. Each period
// probes one member: a direct ping first, then an indirect ping-req fan-out
// through a few peers when the ping fails. Members that fail both probes are
// marked suspect, starting the suspicion subprotocol. The period adapts to
// observed round-trip times, never dropping below the configured minimum.

use crate::membership::Member;
use crate::node::NodeInner;
use crate::protocol::{PingReqRequest, PingRequest};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};

pub mod handlers;
pub mod join;

/// Sliding window of ping round-trip times used to pace the protocol
const RTT_WINDOW: usize = 50;

/// Controls the background protocol-period task
pub(crate) struct Gossip {
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl Gossip {
    pub fn new() -> Self {
        Self {
            shutdown: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Spawn the protocol-period loop; a no-op while already running
    pub fn start(&self, node: Arc<NodeInner>) {
        let mut guard = self.shutdown.lock();
        if guard.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *guard = Some(tx);
        tokio::spawn(run_protocol_loop(node, rx));
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
    }
}

async fn run_protocol_loop(node: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    let mut rtts: VecDeque<Duration> = VecDeque::with_capacity(RTT_WINDOW);

    // jitter the first period so simultaneously started nodes desynchronize
    let jitter = node
        .config
        .min_protocol_period
        .mul_f64(rand::rng().random::<f64>());
    tokio::select! {
        _ = sleep(jitter) => {}
        _ = shutdown.changed() => return,
    }

    loop {
        if *shutdown.borrow() {
            return;
        }
        let started = Instant::now();
        run_protocol_period(&node, &mut rtts).await;

        let period = protocol_delay(node.config.min_protocol_period, &rtts);
        let remaining = period.saturating_sub(started.elapsed());
        tokio::select! {
            _ = sleep(remaining) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// One protocol period: direct ping, then the indirect fallback
async fn run_protocol_period(node: &Arc<NodeInner>, rtts: &mut VecDeque<Duration>) {
    // only one outbound ping may be in flight
    if node.is_pinging.swap(true, Ordering::SeqCst) {
        return;
    }

    let probe = {
        let mut state = node.state.write().await;
        let crate::node::CoreState {
            membership,
            dissemination,
            iter,
            ..
        } = &mut *state;
        match iter.next(membership) {
            Some(target) => {
                let checksum = membership.checksum();
                let request = PingRequest {
                    source: membership.local_address().clone(),
                    checksum,
                    changes: dissemination.issue_changes(None, Some(&target.address), checksum),
                };
                Some((target, request))
            }
            None => None,
        }
    };

    if let Some((target, request)) = probe {
        node.stats.count("ping.send", 1);
        let sent = Instant::now();
        let outcome = timeout(
            node.config.ping_timeout,
            node.transport.ping(&target.address, request),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => {
                let rtt = sent.elapsed();
                node.stats.timing("ping", rtt);
                if rtts.len() == RTT_WINDOW {
                    rtts.pop_front();
                }
                rtts.push_back(rtt);
                node.apply_changes(&response.changes).await;
            }
            _ => {
                tracing::debug!(
                    node = %node.config.host_port,
                    target = %target.address,
                    "ping failed, probing indirectly"
                );
                indirect_probe(node, &target).await;
            }
        }
    }

    node.is_pinging.store(false, Ordering::SeqCst);
}

/// Ask a few peers to probe the target for us; first success wins
async fn indirect_probe(node: &Arc<NodeInner>, target: &Member) {
    let requests = {
        let mut state = node.state.write().await;
        let crate::node::CoreState {
            membership,
            dissemination,
            ..
        } = &mut *state;
        let peers =
            membership.random_pingable_members(node.config.ping_req_size, &[target.address.clone()]);
        let local = membership.local_address().clone();
        let checksum = membership.checksum();
        peers
            .into_iter()
            .map(|peer| {
                let changes = dissemination.issue_changes(None, Some(&peer.address), checksum);
                (
                    peer.address,
                    PingReqRequest {
                        source: local.clone(),
                        target: target.address.clone(),
                        checksum,
                        changes,
                    },
                )
            })
            .collect::<Vec<_>>()
    };

    if requests.is_empty() {
        suspect_target(node, target).await;
        return;
    }

    node.stats.count("ping-req.send", requests.len() as i64);
    let started = Instant::now();

    let mut probes: FuturesUnordered<_> = requests
        .into_iter()
        .map(|(peer, request)| {
            let node = node.clone();
            async move {
                match timeout(
                    node.config.ping_req_timeout,
                    node.transport.ping_req(&peer, request),
                )
                .await
                {
                    Ok(Ok(response)) => Some(response),
                    _ => None,
                }
            }
        })
        .collect();

    let mut reachable = false;
    while let Some(outcome) = probes.next().await {
        if let Some(response) = outcome {
            node.apply_changes(&response.changes).await;
            if response.ping_status {
                reachable = true;
                break;
            }
        }
    }
    node.stats
        .timing("ping-req.other-members", started.elapsed());

    if reachable {
        // someone reached the target for us; reaffirm alive at its current
        // incarnation
        let incarnation = current_incarnation(node, target).await;
        node.apply_changes(&[crate::membership::Change::new(
            target.address.clone(),
            crate::membership::MemberStatus::Alive,
            incarnation,
        )])
        .await;
    } else {
        suspect_target(node, target).await;
    }
}

async fn suspect_target(node: &Arc<NodeInner>, target: &Member) {
    let incarnation = current_incarnation(node, target).await;
    tracing::info!(
        node = %node.config.host_port,
        target = %target.address,
        "member is unreachable, marking suspect"
    );
    node.apply_changes(&[crate::membership::Change::new(
        target.address.clone(),
        crate::membership::MemberStatus::Suspect,
        incarnation,
    )])
    .await;
}

async fn current_incarnation(node: &Arc<NodeInner>, target: &Member) -> i64 {
    let state = node.state.read().await;
    state
        .membership
        .get(&target.address)
        .map(|m| m.incarnation_number)
        .unwrap_or(target.incarnation_number)
}

/// Next protocol period: twice the observed median RTT, floored at the
/// configured minimum
fn protocol_delay(min_protocol_period: Duration, rtts: &VecDeque<Duration>) -> Duration {
    if rtts.is_empty() {
        return min_protocol_period;
    }
    let mut sorted: Vec<Duration> = rtts.iter().copied().collect();
    sorted.sort();
    let median = sorted[sorted.len() / 2];
    min_protocol_period.max(median * 2)
}
