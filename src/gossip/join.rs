// Join and Bootstrap
//
// A new node announces itself to a handful of seed hosts and merges their
// membership snapshots. The fan-out retries with backoff until enough seeds
// respond or the join deadline passes. Leaving and rejoining reuse the same
// machinery: a leaver restates itself with status leave and lets gossip do
// the rest; a rejoiner bumps its incarnation and joins again.

use crate::config;
use crate::error::{Result, RingError};
use crate::membership::{next_incarnation, Change, MemberStatus};
use crate::node::NodeInner;
use crate::protocol::JoinRequest;
use crate::Address;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Where the seed host list comes from
#[derive(Debug, Clone)]
pub enum BootstrapSeeds {
    /// Caller-provided host list
    List(Vec<Address>),

    /// Caller-provided JSON file of `"host:port"` strings
    File(PathBuf),

    /// The configured `bootstrap_file`, falling back to `./hosts.json`
    Discover,
}

impl From<Vec<Address>> for BootstrapSeeds {
    fn from(hosts: Vec<Address>) -> Self {
        BootstrapSeeds::List(hosts)
    }
}

impl From<Vec<&str>> for BootstrapSeeds {
    fn from(hosts: Vec<&str>) -> Self {
        BootstrapSeeds::List(hosts.into_iter().map(str::to_string).collect())
    }
}

impl From<PathBuf> for BootstrapSeeds {
    fn from(path: PathBuf) -> Self {
        BootstrapSeeds::File(path)
    }
}

/// Result of an admin join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminJoinOutcome {
    /// The node had left and was revived in place
    Rejoined,

    /// A fresh join fan-out completed against these hosts
    Joined(Vec<Address>),
}

/// Bring the local node into the cluster named by the seed list
pub(crate) async fn bootstrap(
    node: &Arc<NodeInner>,
    seeds: BootstrapSeeds,
) -> Result<Vec<Address>> {
    if node.is_ready() {
        return Err(RingError::Lifecycle(
            "bootstrap called on an already bootstrapped node".to_string(),
        ));
    }
    if node.is_destroyed() {
        return Err(RingError::DestroyedDuringBootstrap);
    }

    let hosts = resolve_seeds(&node.config, seeds)?;
    if hosts.is_empty() {
        return Err(RingError::Lifecycle(
            "bootstrap requires a non-empty seed list".to_string(),
        ));
    }
    warn_on_mixed_host_families(&node.config.host_port, &hosts);

    node.apply_changes(&[Change::new(
        node.config.host_port.clone(),
        MemberStatus::Alive,
        next_incarnation(),
    )])
    .await;

    join_fanout(node, &hosts).await
}

/// Fan out join requests until enough seeds accept or the deadline passes
pub(crate) async fn join_fanout(node: &Arc<NodeInner>, hosts: &[Address]) -> Result<Vec<Address>> {
    let local = node.config.host_port.clone();
    let mut candidates: Vec<Address> = hosts.iter().filter(|h| **h != local).cloned().collect();
    candidates.sort();
    candidates.dedup();

    if candidates.is_empty() {
        // a cluster of one; nothing to contact
        return Ok(Vec::new());
    }

    let required = node.config.join_size.min(candidates.len());
    let started = Instant::now();
    let deadline = started + node.config.max_join_duration;
    let mut joined: Vec<Address> = Vec::new();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if node.is_destroyed() {
            return Err(RingError::DestroyedDuringBootstrap);
        }

        let incarnation = {
            let state = node.state.read().await;
            state
                .membership
                .local_member()
                .map(|m| m.incarnation_number)
                .unwrap_or_else(next_incarnation)
        };

        let mut round: Vec<Address> = candidates
            .iter()
            .filter(|host| !joined.contains(*host))
            .cloned()
            .collect();
        round.shuffle(&mut rand::rng());
        round.truncate(node.config.join_size);

        let attempts = round.into_iter().map(|host| {
            let node = node.clone();
            let request = JoinRequest {
                app: node.config.app.clone(),
                source: local.clone(),
                incarnation_number: incarnation,
            };
            async move {
                match timeout(node.config.join_timeout, node.transport.join(&host, request))
                    .await
                {
                    Ok(Ok(response)) => Some((host, response)),
                    Ok(Err(e)) => {
                        tracing::debug!(seed = %host, error = %e, "join attempt failed");
                        None
                    }
                    Err(_) => {
                        tracing::debug!(seed = %host, "join attempt timed out");
                        None
                    }
                }
            }
        });

        for (host, response) in futures::future::join_all(attempts)
            .await
            .into_iter()
            .flatten()
        {
            if response.app != node.config.app {
                tracing::warn!(
                    seed = %host,
                    app = %response.app,
                    "seed answered for a different app, ignoring"
                );
                continue;
            }
            let changes: Vec<Change> = response
                .membership
                .iter()
                .map(|member| Change::from_member(member).with_source(host.clone()))
                .collect();
            node.apply_changes(&changes).await;
            if !joined.contains(&host) {
                joined.push(host);
            }
        }

        if joined.len() >= required {
            node.stats.timing("join", started.elapsed());
            tracing::info!(
                node = %local,
                joined = joined.len(),
                elapsed = ?started.elapsed(),
                "join complete"
            );
            return Ok(joined);
        }

        if Instant::now() + backoff >= deadline {
            return Err(RingError::Join(format!(
                "joined {}/{} seeds before the {}ms deadline",
                joined.len(),
                required,
                node.config.max_join_duration.as_millis()
            )));
        }

        let mut destroyed = node.destroyed_rx();
        tokio::select! {
            _ = sleep(backoff) => {}
            _ = destroyed.changed() => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn resolve_seeds(config: &crate::RingConfig, seeds: BootstrapSeeds) -> Result<Vec<Address>> {
    match seeds {
        BootstrapSeeds::List(hosts) => Ok(hosts),
        BootstrapSeeds::File(path) => read_hosts_file(&path),
        BootstrapSeeds::Discover => {
            let path = config
                .bootstrap_file
                .clone()
                .unwrap_or_else(|| PathBuf::from("./hosts.json"));
            read_hosts_file(&path)
        }
    }
}

fn read_hosts_file(path: &PathBuf) -> Result<Vec<Address>> {
    let raw = std::fs::read_to_string(path)?;
    let hosts: Vec<Address> = serde_json::from_str(&raw)?;
    Ok(hosts)
}

/// Warn when the local address family (IP vs hostname) disagrees with the
/// majority of the seed list; mixed families usually mean a config mistake
fn warn_on_mixed_host_families(local: &Address, hosts: &[Address]) {
    let ip_count = hosts.iter().filter(|h| config::is_ip_host(h)).count();
    let majority_is_ip = ip_count * 2 >= hosts.len();
    if config::is_ip_host(local) != majority_is_ip {
        tracing::warn!(
            node = %local,
            "local address family differs from the majority of the seed list"
        );
    }
}
