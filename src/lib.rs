// Ringshard - application-layer sharding for Rust services
//
// A process joins a named cluster, discovers peers via a SWIM-style gossip
// protocol, and routes keyed requests to the owning node through a consistent
// hash ring kept in sync with the membership view. Every node runs the same
// protocol; there is no coordinator.

pub mod config;
pub mod error;
pub mod gossip;
pub mod membership;
pub mod node;
pub mod protocol;
pub mod ring;
pub mod stats;
pub mod transport;

pub use config::RingConfig;
pub use error::{Result, RingError};
pub use gossip::join::{AdminJoinOutcome, BootstrapSeeds};
pub use membership::dissemination::PiggybackAdjustment;
pub use membership::{Change, Member, MemberStatus, Membership, MembershipUpdate, UpdateKind};
pub use node::{Node, NodeEvent, RingChange, RouteOutcome, RoutedResponse};
pub use ring::HashRing;
pub use stats::{NoopStats, StatsHook, StatsSink};
pub use transport::{MemoryMesh, MemoryTransport, ProtocolHandler, Transport};

/// Node identifier within a cluster, of the form `ipOrHost:port`.
pub type Address = String;
