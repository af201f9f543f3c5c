// Infection-style Dissemination
//
// Buffers the most recent change per address and piggybacks a bounded batch
// on every outgoing protocol message. Each change rides at most
// `max_piggyback_count` messages, a cap that scales with the logarithm of
// the cluster size so a change reaches full coverage with high probability.

use crate::membership::Change;
use crate::Address;
use std::collections::HashMap;

/// Multiplier applied to `ceil(log2(n + 1))` when sizing the piggyback cap
pub const PIGGYBACK_FACTOR: usize = 3;

/// Emitted when a membership-size change moved the piggyback cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PiggybackAdjustment {
    pub previous: usize,
    pub current: usize,
    pub member_count: usize,
}

/// Buffer of pending membership changes, one per address
#[derive(Debug)]
pub struct Dissemination {
    changes: HashMap<Address, Change>,
    max_piggyback_count: usize,
}

impl Dissemination {
    pub fn new() -> Self {
        Self {
            changes: HashMap::new(),
            max_piggyback_count: Self::cap_for(1),
        }
    }

    fn cap_for(member_count: usize) -> usize {
        let bits = ((member_count + 1) as f64).log2().ceil() as usize;
        bits.max(1) * PIGGYBACK_FACTOR
    }

    pub fn max_piggyback_count(&self) -> usize {
        self.max_piggyback_count
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.changes.contains_key(address)
    }

    /// Record an accepted change, superseding any pending one for the address
    pub fn record_change(&mut self, mut change: Change) {
        change.piggyback_count = 0;
        self.changes.insert(change.address.clone(), change);
    }

    /// Select the piggyback batch for one outgoing message.
    ///
    /// Returns nothing when the peer's checksum already matches ours.
    /// Otherwise picks the least-disseminated changes first, skipping any the
    /// peer itself reported, and drops entries that have now reached the cap.
    pub fn issue_changes(
        &mut self,
        peer_checksum: Option<u32>,
        peer: Option<&Address>,
        local_checksum: u32,
    ) -> Vec<Change> {
        if peer_checksum == Some(local_checksum) {
            return Vec::new();
        }

        let mut pending: Vec<(usize, Address)> = self
            .changes
            .values()
            .filter(|c| match (peer, &c.source) {
                (Some(peer), Some(source)) => source != peer,
                _ => true,
            })
            .map(|c| (c.piggyback_count, c.address.clone()))
            .collect();
        pending.sort();
        pending.truncate(self.max_piggyback_count);

        let mut issued = Vec::with_capacity(pending.len());
        for (_, address) in pending {
            let exhausted = match self.changes.get_mut(&address) {
                Some(change) => {
                    change.piggyback_count += 1;
                    issued.push(change.clone());
                    change.piggyback_count >= self.max_piggyback_count
                }
                None => false,
            };
            if exhausted {
                self.changes.remove(&address);
            }
        }
        issued
    }

    /// Recompute the cap for a new member count; `Some` only when it moved
    pub fn adjust_max_piggyback_count(
        &mut self,
        member_count: usize,
    ) -> Option<PiggybackAdjustment> {
        let current = Self::cap_for(member_count);
        if current == self.max_piggyback_count {
            return None;
        }
        let previous = std::mem::replace(&mut self.max_piggyback_count, current);
        Some(PiggybackAdjustment {
            previous,
            current,
            member_count,
        })
    }
}

impl Default for Dissemination {
    fn default() -> Self {
        Self::new()
    }
}
