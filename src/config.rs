// Node Configuration
//
// All tunables for a single cluster node: identity (app namespace, local
// address), protocol timeouts, fan-out sizes, and ring geometry. Defaults
// follow the values the protocol was tuned with; tests shrink them freely.

use crate::error::{Result, RingError};
use crate::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a cluster node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Cluster namespace; join requests with a different `app` are rejected
    pub app: String,

    /// Local address of the form `ipOrHost:port`
    pub host_port: Address,

    /// Default seed file for bootstrap (falls back to `./hosts.json`)
    pub bootstrap_file: Option<PathBuf>,

    /// Number of seeds contacted concurrently during join
    pub join_size: usize,

    /// Number of intermediaries asked to probe an unresponsive peer
    pub ping_req_size: usize,

    /// Per-attempt timeout for join requests
    pub join_timeout: Duration,

    /// Timeout for a direct ping
    pub ping_timeout: Duration,

    /// Timeout for an indirect ping-req probe
    pub ping_req_timeout: Duration,

    /// Timeout for forwarded (proxied) requests
    pub proxy_req_timeout: Duration,

    /// Lower bound on the protocol period
    pub min_protocol_period: Duration,

    /// Overall deadline for the bootstrap join fan-out
    pub max_join_duration: Duration,

    /// How long a member may stay suspect before it is declared faulty
    pub suspicion_timeout: Duration,

    /// Replica points per server on the hash ring
    pub ring_replica_points: u32,
}

impl RingConfig {
    /// Create a configuration with the given identity and default tunables
    pub fn new(app: impl Into<String>, host_port: impl Into<Address>) -> Self {
        Self {
            app: app.into(),
            host_port: host_port.into(),
            ..Default::default()
        }
    }

    /// Validate identity fields; called at node construction
    pub fn validate(&self) -> Result<()> {
        if self.app.trim().is_empty() {
            return Err(RingError::Configuration(
                "app name must not be empty".to_string(),
            ));
        }
        if split_host_port(&self.host_port).is_none() {
            return Err(RingError::Configuration(format!(
                "host_port must be of the form host:port, got {:?}",
                self.host_port
            )));
        }
        if self.ring_replica_points == 0 {
            return Err(RingError::Configuration(
                "ring_replica_points must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            app: "ringshard".to_string(),
            host_port: "127.0.0.1:3000".to_string(),
            bootstrap_file: None,
            join_size: 3,
            ping_req_size: 3,
            join_timeout: Duration::from_millis(1000),
            ping_timeout: Duration::from_millis(1500),
            ping_req_timeout: Duration::from_millis(5000),
            proxy_req_timeout: Duration::from_millis(30000),
            min_protocol_period: Duration::from_millis(200),
            max_join_duration: Duration::from_secs(300),
            suspicion_timeout: Duration::from_secs(5),
            ring_replica_points: 100,
        }
    }
}

/// Split an `ipOrHost:port` address into host and port
pub(crate) fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host, port))
}

/// Whether the host part of an address is an IP literal rather than a hostname
pub(crate) fn is_ip_host(address: &str) -> bool {
    match split_host_port(address) {
        Some((host, _)) => host.parse::<std::net::IpAddr>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.join_size, 3);
        assert_eq!(config.ping_req_size, 3);
        assert_eq!(config.ping_timeout, Duration::from_millis(1500));
        assert_eq!(config.ring_replica_points, 100);
    }

    #[test]
    fn test_validate_rejects_empty_app() {
        let config = RingConfig::new("", "127.0.0.1:3000");
        assert!(matches!(
            config.validate(),
            Err(RingError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_malformed_host_port() {
        for bad in ["localhost", ":3000", "127.0.0.1:", "127.0.0.1:notaport"] {
            let config = RingConfig::new("mars", bad);
            assert!(
                matches!(config.validate(), Err(RingError::Configuration(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("127.0.0.1:3000"), Some(("127.0.0.1", 3000)));
        assert_eq!(split_host_port("node-a.local:80"), Some(("node-a.local", 80)));
        assert_eq!(split_host_port("nocolon"), None);
    }

    #[test]
    fn test_is_ip_host() {
        assert!(is_ip_host("10.0.0.1:3000"));
        assert!(!is_ip_host("gossip-1.internal:3000"));
        assert!(!is_ip_host("nocolon"));
    }
}
