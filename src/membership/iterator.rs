// Round-robin Probe Target Selection
//
// The failure detector walks the membership in shuffled rounds so every
// pingable member is probed once per cycle. A fresh shuffle starts each
// round; members that became faulty or departed mid-round are skipped.

use crate::membership::Membership;
use crate::Address;
use rand::seq::SliceRandom;

#[derive(Debug, Default)]
pub struct MemberIterator {
    queue: Vec<Address>,
    position: usize,
}

impl MemberIterator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next member to probe, or `None` when nobody is pingable
    pub fn next(&mut self, membership: &Membership) -> Option<crate::membership::Member> {
        if let Some(member) = self.advance(membership) {
            return Some(member);
        }
        // round exhausted; reshuffle from the current membership
        self.queue = membership.pingable_addresses();
        self.queue.shuffle(&mut rand::rng());
        self.position = 0;
        self.advance(membership)
    }

    fn advance(&mut self, membership: &Membership) -> Option<crate::membership::Member> {
        while self.position < self.queue.len() {
            let address = &self.queue[self.position];
            self.position += 1;
            match membership.get(address) {
                Some(member) if member.status.is_pingable() => return Some(member.clone()),
                _ => {}
            }
        }
        None
    }
}
