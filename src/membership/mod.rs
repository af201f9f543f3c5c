// Cluster Membership
//
// Canonical per-node member table with SWIM-style conflict resolution:
// - Per-member status lifecycle (alive / suspect / faulty / leave / damped)
// - Incarnation numbers owned by each member, used to break ties
// - Refutation of demoting claims about the local node
// - Deterministic checksum over the member set for cheap agreement checks
//
// Members are created on first observation and never deleted; faulty and
// departed entries persist so reconciliation stays consistent with peers
// that still carry them.

use crate::Address;
use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod dissemination;
pub mod iterator;
pub mod suspicion;

/// Member status within the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Responding to probes
    Alive,

    /// Unresponsive; may still refute before the suspicion timeout
    Suspect,

    /// Declared failed after the suspicion timeout elapsed
    Faulty,

    /// Departed voluntarily
    Leave,

    /// Removed by the flap-damping subprotocol
    Damped,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Alive => "alive",
            MemberStatus::Suspect => "suspect",
            MemberStatus::Faulty => "faulty",
            MemberStatus::Leave => "leave",
            MemberStatus::Damped => "damped",
        }
    }

    /// Conflict-resolution precedence at equal incarnation:
    /// alive < suspect < faulty = leave = damped
    fn precedence(&self) -> u8 {
        match self {
            MemberStatus::Alive => 0,
            MemberStatus::Suspect => 1,
            MemberStatus::Faulty | MemberStatus::Leave | MemberStatus::Damped => 2,
        }
    }

    /// Whether the failure detector should still probe this member
    pub fn is_pingable(&self) -> bool {
        matches!(self, MemberStatus::Alive | MemberStatus::Suspect)
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One participant in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub address: Address,

    pub status: MemberStatus,

    /// Version chosen by the member itself; higher wins during reconciliation
    pub incarnation_number: i64,

    /// Flap counter maintained by the damping subprotocol
    #[serde(default)]
    pub damp_score: u32,
}

impl Member {
    pub fn new(address: Address, status: MemberStatus, incarnation_number: i64) -> Self {
        Self {
            address,
            status,
            incarnation_number,
            damp_score: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == MemberStatus::Alive
    }
}

/// A proposed membership delta, the unit of dissemination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub address: Address,

    pub status: MemberStatus,

    pub incarnation_number: i64,

    /// Node that observed the change; used to avoid echoing it back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Address>,

    /// How many outgoing messages have carried this change; never on the wire
    #[serde(skip)]
    pub piggyback_count: usize,
}

impl Change {
    pub fn new(address: Address, status: MemberStatus, incarnation_number: i64) -> Self {
        Self {
            address,
            status,
            incarnation_number,
            source: None,
            piggyback_count: 0,
        }
    }

    pub fn with_source(mut self, source: Address) -> Self {
        self.source = Some(source);
        self
    }

    pub fn from_member(member: &Member) -> Self {
        Self::new(
            member.address.clone(),
            member.status,
            member.incarnation_number,
        )
    }
}

/// Kind of an applied membership update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    New,
    Alive,
    Suspect,
    Faulty,
    Leave,
    Damped,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::New => "new",
            UpdateKind::Alive => "alive",
            UpdateKind::Suspect => "suspect",
            UpdateKind::Faulty => "faulty",
            UpdateKind::Leave => "leave",
            UpdateKind::Damped => "damped",
        }
    }

    fn from_status(status: MemberStatus) -> Self {
        match status {
            MemberStatus::Alive => UpdateKind::Alive,
            MemberStatus::Suspect => UpdateKind::Suspect,
            MemberStatus::Faulty => UpdateKind::Faulty,
            MemberStatus::Leave => UpdateKind::Leave,
            MemberStatus::Damped => UpdateKind::Damped,
        }
    }
}

/// An accepted change, as emitted to event listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipUpdate {
    pub kind: UpdateKind,
    pub member: Member,
    pub source: Option<Address>,
}

// Incarnation numbers are seeded from wall-clock milliseconds but forced
// monotonic process-wide, so a stepped-back clock can never reissue one.
static LAST_INCARNATION: AtomicI64 = AtomicI64::new(0);

pub(crate) fn next_incarnation() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let mut prev = LAST_INCARNATION.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_INCARNATION.compare_exchange_weak(
            prev,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(observed) => prev = observed,
        }
    }
}

/// The canonical member table of one node
#[derive(Debug)]
pub struct Membership {
    members: BTreeMap<Address, Member>,
    local: Address,
    checksum: u32,
}

impl Membership {
    pub fn new(local: Address) -> Self {
        let mut membership = Self {
            members: BTreeMap::new(),
            local,
            checksum: 0,
        };
        membership.checksum = membership.compute_checksum();
        membership
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    pub fn local_member(&self) -> Option<&Member> {
        self.members.get(&self.local)
    }

    pub fn get(&self, address: &str) -> Option<&Member> {
        self.members.get(address)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Cached checksum, updated with every mutation
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Recompute the checksum from scratch; a pure function of the member set
    pub fn compute_checksum(&self) -> u32 {
        let joined = self
            .members
            .values()
            .map(|m| {
                format!(
                    "{} {} {}",
                    m.address,
                    m.status.as_str(),
                    m.incarnation_number
                )
            })
            .collect::<Vec<_>>()
            .join(";");
        crc32fast::hash(joined.as_bytes())
    }

    /// Snapshot of every known member, used in join responses
    pub fn get_state(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    /// Idempotent insert of a member as alive
    pub fn add_member(
        &mut self,
        address: &str,
        incarnation_number: Option<i64>,
    ) -> Vec<MembershipUpdate> {
        if self.members.contains_key(address) {
            return Vec::new();
        }
        let incarnation = incarnation_number.unwrap_or_else(next_incarnation);
        self.update(&[Change::new(
            address.to_string(),
            MemberStatus::Alive,
            incarnation,
        )])
    }

    /// Reconcile a batch of changes in input order; returns the updates
    /// actually applied
    pub fn update(&mut self, changes: &[Change]) -> Vec<MembershipUpdate> {
        let mut applied = Vec::new();
        for change in changes {
            if let Some(update) = self.reconcile(change) {
                applied.push(update);
            }
        }
        if !applied.is_empty() {
            self.checksum = self.compute_checksum();
        }
        applied
    }

    pub fn make_alive(&mut self, address: &str, incarnation: i64) -> Vec<MembershipUpdate> {
        self.make(address, MemberStatus::Alive, incarnation)
    }

    pub fn make_suspect(&mut self, address: &str, incarnation: i64) -> Vec<MembershipUpdate> {
        self.make(address, MemberStatus::Suspect, incarnation)
    }

    pub fn make_faulty(&mut self, address: &str, incarnation: i64) -> Vec<MembershipUpdate> {
        self.make(address, MemberStatus::Faulty, incarnation)
    }

    pub fn make_leave(&mut self, address: &str, incarnation: i64) -> Vec<MembershipUpdate> {
        self.make(address, MemberStatus::Leave, incarnation)
    }

    pub fn make_damped(&mut self, address: &str, incarnation: i64) -> Vec<MembershipUpdate> {
        self.make(address, MemberStatus::Damped, incarnation)
    }

    fn make(
        &mut self,
        address: &str,
        status: MemberStatus,
        incarnation: i64,
    ) -> Vec<MembershipUpdate> {
        self.update(&[Change::new(address.to_string(), status, incarnation)])
    }

    /// Uniform sample of up to `n` alive, non-local members outside `exclude`
    pub fn random_pingable_members(&self, n: usize, exclude: &[Address]) -> Vec<Member> {
        let candidates: Vec<&Member> = self
            .members
            .values()
            .filter(|m| {
                m.is_alive() && m.address != self.local && !exclude.contains(&m.address)
            })
            .collect();
        candidates
            .choose_multiple(&mut rand::rng(), n)
            .map(|m| (*m).clone())
            .collect()
    }

    /// Addresses the round-robin probe iterator may visit
    pub(crate) fn pingable_addresses(&self) -> Vec<Address> {
        self.members
            .values()
            .filter(|m| m.status.is_pingable() && m.address != self.local)
            .map(|m| m.address.clone())
            .collect()
    }

    // Applies one change against the local table. A demoting claim about the
    // local node is refuted by restating alive at a higher incarnation.
    fn reconcile(&mut self, change: &Change) -> Option<MembershipUpdate> {
        let about_local = change.address == self.local;
        let demotes_local = about_local
            && matches!(change.status, MemberStatus::Suspect | MemberStatus::Faulty);

        if demotes_local {
            let local_incarnation = self
                .local_member()
                .map(|m| m.incarnation_number)
                .unwrap_or(0);
            if change.incarnation_number < local_incarnation {
                // stale rumor about an earlier incarnation of us
                return None;
            }
            let refuted = local_incarnation.max(change.incarnation_number) + 1;
            let member = self
                .members
                .entry(self.local.clone())
                .or_insert_with(|| Member::new(self.local.clone(), MemberStatus::Alive, refuted));
            member.status = MemberStatus::Alive;
            member.incarnation_number = refuted;
            return Some(MembershipUpdate {
                kind: UpdateKind::Alive,
                member: member.clone(),
                source: None,
            });
        }

        match self.members.get_mut(&change.address) {
            None => {
                let member = Member::new(
                    change.address.clone(),
                    change.status,
                    change.incarnation_number,
                );
                self.members.insert(change.address.clone(), member.clone());
                Some(MembershipUpdate {
                    kind: UpdateKind::New,
                    member,
                    source: change.source.clone(),
                })
            }
            Some(existing) => {
                let accept = change.incarnation_number > existing.incarnation_number
                    || (change.incarnation_number == existing.incarnation_number
                        && change.status.precedence() > existing.status.precedence());
                if !accept {
                    return None;
                }
                existing.status = change.status;
                existing.incarnation_number = change.incarnation_number;
                Some(MembershipUpdate {
                    kind: UpdateKind::from_status(change.status),
                    member: existing.clone(),
                    source: change.source.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "127.0.0.1:3000";
    const PEER_A: &str = "127.0.0.1:3001";
    const PEER_B: &str = "127.0.0.1:3002";

    fn membership() -> Membership {
        let mut m = Membership::new(LOCAL.to_string());
        m.add_member(LOCAL, Some(10));
        m
    }

    #[test]
    fn test_add_member_is_idempotent() {
        let mut m = membership();
        let first = m.add_member(PEER_A, Some(1));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, UpdateKind::New);

        let second = m.add_member(PEER_A, Some(1));
        assert!(second.is_empty());
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_checksum_matches_recomputation() {
        let mut m = membership();
        m.add_member(PEER_A, Some(1));
        m.make_suspect(PEER_A, 1);
        m.add_member(PEER_B, Some(2));
        assert_eq!(m.checksum(), m.compute_checksum());
    }

    #[test]
    fn test_checksum_is_order_independent() {
        let mut a = Membership::new(LOCAL.to_string());
        a.add_member(PEER_A, Some(1));
        a.add_member(PEER_B, Some(2));

        let mut b = Membership::new(LOCAL.to_string());
        b.add_member(PEER_B, Some(2));
        b.add_member(PEER_A, Some(1));

        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_higher_incarnation_wins() {
        let mut m = membership();
        m.add_member(PEER_A, Some(5));
        m.make_suspect(PEER_A, 5);

        // alive at a higher incarnation overrides suspect
        let applied = m.make_alive(PEER_A, 6);
        assert_eq!(applied.len(), 1);
        assert_eq!(m.get(PEER_A).unwrap().status, MemberStatus::Alive);

        // alive at the same incarnation does not override suspect
        m.make_suspect(PEER_A, 6);
        let applied = m.make_alive(PEER_A, 6);
        assert!(applied.is_empty());
        assert_eq!(m.get(PEER_A).unwrap().status, MemberStatus::Suspect);
    }

    #[test]
    fn test_status_precedence_at_equal_incarnation() {
        let mut m = membership();
        m.add_member(PEER_A, Some(3));

        assert_eq!(m.make_suspect(PEER_A, 3).len(), 1);
        assert_eq!(m.make_faulty(PEER_A, 3).len(), 1);
        // leave and faulty share precedence; neither overrides the other
        assert!(m.make_leave(PEER_A, 3).is_empty());
        assert_eq!(m.get(PEER_A).unwrap().status, MemberStatus::Faulty);
    }

    #[test]
    fn test_stale_incarnation_is_rejected() {
        let mut m = membership();
        m.add_member(PEER_A, Some(9));
        assert!(m.make_suspect(PEER_A, 8).is_empty());
        assert_eq!(m.get(PEER_A).unwrap().status, MemberStatus::Alive);
    }

    #[test]
    fn test_local_node_refutes_suspicion() {
        let mut m = membership();
        let applied = m.update(&[Change::new(
            LOCAL.to_string(),
            MemberStatus::Suspect,
            12,
        )]);

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].kind, UpdateKind::Alive);
        let local = m.local_member().unwrap();
        assert_eq!(local.status, MemberStatus::Alive);
        assert_eq!(local.incarnation_number, 13);
    }

    #[test]
    fn test_local_node_ignores_stale_suspicion() {
        let mut m = membership();
        let applied = m.update(&[Change::new(LOCAL.to_string(), MemberStatus::Faulty, 9)]);
        assert!(applied.is_empty());
        assert_eq!(m.local_member().unwrap().incarnation_number, 10);
    }

    #[test]
    fn test_local_leave_is_not_refuted() {
        let mut m = membership();
        let applied = m.make_leave(LOCAL, 10);
        assert_eq!(applied.len(), 1);
        assert_eq!(m.local_member().unwrap().status, MemberStatus::Leave);
    }

    #[test]
    fn test_update_with_own_state_is_noop() {
        let mut m = membership();
        m.add_member(PEER_A, Some(1));
        m.make_suspect(PEER_A, 1);

        let state: Vec<Change> = m.get_state().iter().map(Change::from_member).collect();
        let before = m.checksum();
        let applied = m.update(&state);
        assert!(applied.is_empty());
        assert_eq!(m.checksum(), before);
    }

    #[test]
    fn test_first_observation_may_be_faulty() {
        let mut m = membership();
        let applied = m.update(&[Change::new(
            PEER_A.to_string(),
            MemberStatus::Faulty,
            4,
        )]);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].kind, UpdateKind::New);
        assert_eq!(m.get(PEER_A).unwrap().status, MemberStatus::Faulty);
    }

    #[test]
    fn test_random_pingable_members_filters() {
        let mut m = membership();
        m.add_member(PEER_A, Some(1));
        m.add_member(PEER_B, Some(1));
        m.make_faulty(PEER_B, 1);

        let sampled = m.random_pingable_members(5, &[]);
        assert_eq!(sampled.len(), 1);
        assert_eq!(sampled[0].address, PEER_A);

        let excluded = m.random_pingable_members(5, &[PEER_A.to_string()]);
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_batch_applies_in_input_order() {
        let mut m = membership();
        let applied = m.update(&[
            Change::new(PEER_A.to_string(), MemberStatus::Alive, 1),
            Change::new(PEER_A.to_string(), MemberStatus::Suspect, 1),
        ]);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].kind, UpdateKind::New);
        assert_eq!(applied[1].kind, UpdateKind::Suspect);
        assert_eq!(m.get(PEER_A).unwrap().status, MemberStatus::Suspect);
    }

    #[test]
    fn test_next_incarnation_is_strictly_increasing() {
        let a = next_incarnation();
        let b = next_incarnation();
        let c = next_incarnation();
        assert!(a < b && b < c);
    }
}
