// Consistent Hash Ring
//
// Maps string keys to owning servers with minimal reassignment as servers
// come and go. Each server contributes a fixed number of replica points,
// hashed onto a 32-bit ring; a key is owned by the server at the first
// position at or after the key's hash, wrapping around. Positions that
// collide are disambiguated by lexicographic address order, which the
// composite map key encodes directly.

use crate::Address;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug)]
pub struct HashRing {
    ring: BTreeMap<(u32, Address), ()>,
    servers: HashSet<Address>,
    replica_points: u32,
}

impl HashRing {
    pub fn new(replica_points: u32) -> Self {
        Self {
            ring: BTreeMap::new(),
            servers: HashSet::new(),
            replica_points,
        }
    }

    /// 32-bit position for a key or replica point
    pub fn hash(data: &str) -> u32 {
        crc32fast::hash(data.as_bytes())
    }

    /// Insert a server's replica points; returns false if already present
    pub fn add_server(&mut self, address: &Address) -> bool {
        if !self.servers.insert(address.clone()) {
            return false;
        }
        for replica in 0..self.replica_points {
            let position = Self::hash(&format!("{}{}", address, replica));
            self.ring.insert((position, address.clone()), ());
        }
        true
    }

    /// Remove a server's replica points; returns false if absent
    pub fn remove_server(&mut self, address: &Address) -> bool {
        if !self.servers.remove(address) {
            return false;
        }
        for replica in 0..self.replica_points {
            let position = Self::hash(&format!("{}{}", address, replica));
            self.ring.remove(&(position, address.clone()));
        }
        true
    }

    /// Owner of a key, or `None` on an empty ring
    pub fn lookup(&self, key: &str) -> Option<&Address> {
        if self.ring.is_empty() {
            return None;
        }
        let position = Self::hash(key);
        self.ring
            .range((position, String::new())..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|((_, address), _)| address)
    }

    pub fn contains_server(&self, address: &str) -> bool {
        self.servers.contains(address)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Sorted server set, mainly for stats output
    pub fn servers(&self) -> Vec<Address> {
        let mut servers: Vec<Address> = self.servers.iter().cloned().collect();
        servers.sort();
        servers
    }
}
