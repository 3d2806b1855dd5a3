//! Server configuration.
//!
//! One flat structure covers the whole server: switchboard, inbox, and
//! engine. The engine itself only reads a subset, but recognizing every
//! option here keeps a single configuration file format for the embedding
//! binary, which deserializes it with serde from whatever syntax it favors.
//! All fields default to the reference values.

use crate::server::conn::ConnInfo;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

//------------ Config --------------------------------------------------------

/// Configuration of a RAINS server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Switchboard.
    /// The IP address the server listens on.
    pub server_ip_addr: IpAddr,

    /// The port the server listens on.
    pub server_port: u16,

    /// Maximum number of open connections.
    pub max_connections: usize,

    /// Keep-alive period of idle connections, in seconds.
    pub keep_alive_period_secs: u64,

    /// TCP timeout of outbound sends, in seconds.
    pub tcp_timeout_secs: u64,

    /// Path to the TLS certificate.
    pub certificate_file: String,

    /// Path to the TLS private key.
    pub private_key_file: String,

    // Inbox.
    /// Maximum accepted message size in bytes.
    pub max_msg_byte_length: usize,

    /// Capacity of the priority queue.
    pub prio_buffer_size: usize,

    /// Capacity of the normal queue.
    pub normal_buffer_size: usize,

    /// Capacity of the notification queue.
    pub notification_buffer_size: usize,

    /// Workers serving the priority queue.
    pub prio_worker_count: usize,

    /// Workers serving the normal queue.
    pub normal_worker_count: usize,

    /// Workers serving the notification queue.
    pub notification_worker_count: usize,

    // Caches.
    /// Capacity of the zone key cache.
    pub zone_key_cache_size: usize,

    /// Capacity of the assertion cache.
    pub assertion_cache_size: usize,

    /// Capacity of the negative assertion cache.
    pub negative_assertion_cache_size: usize,

    /// Capacity of the pending query cache.
    pub pending_query_cache_size: usize,

    /// Capacity of the pending key cache.
    pub pending_key_cache_size: usize,

    /// Capacity of the address cache, per family.
    pub address_cache_size: usize,

    /// Capacity of the capabilities cache (switchboard side).
    pub capabilities_cache_size: usize,

    /// Capacity of the peer-to-capabilities cache (switchboard side).
    pub peer_to_cap_cache_size: usize,

    /// Capacity of the redirect cache.
    pub redirect_cache_size: usize,

    // Engine.
    /// Upper bound on the lifetime of a forwarded query, in seconds.
    pub query_validity_secs: u64,

    /// Upper bound on the lifetime of a forwarded address query, in seconds.
    pub address_query_validity_secs: u64,

    /// Interval between cache reaper sweeps, in seconds.
    pub reap_interval_secs: u64,

    /// Whether this server follows redirects iteratively.
    pub iterative_lookup: bool,

    /// The root server queries are forwarded to when nothing closer is
    /// known. Unset means this server considers itself the root.
    pub root_server_addr: Option<SocketAddr>,
}

impl Config {
    /// Returns the connection information of this server itself.
    pub fn server_conn(&self) -> ConnInfo {
        ConnInfo::tcp(SocketAddr::new(self.server_ip_addr, self.server_port))
    }

    /// The lifetime cap of a forwarded query.
    pub fn query_validity(&self) -> Duration {
        Duration::from_secs(self.query_validity_secs)
    }

    /// The lifetime cap of a forwarded address query.
    pub fn address_query_validity(&self) -> Duration {
        Duration::from_secs(self.address_query_validity_secs)
    }

    /// The interval between reaper sweeps.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_ip_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_port: 5022,
            max_connections: 1000,
            keep_alive_period_secs: 60,
            tcp_timeout_secs: 300,
            certificate_file: "config/server.crt".into(),
            private_key_file: "config/server.key".into(),
            max_msg_byte_length: 65536,
            prio_buffer_size: 1000,
            normal_buffer_size: 100_000,
            notification_buffer_size: 20,
            prio_worker_count: 2,
            normal_worker_count: 10,
            notification_worker_count: 2,
            zone_key_cache_size: 1000,
            assertion_cache_size: 10_000,
            negative_assertion_cache_size: 500,
            pending_query_cache_size: 100,
            pending_key_cache_size: 1000,
            address_cache_size: 1000,
            capabilities_cache_size: 50,
            peer_to_cap_cache_size: 1000,
            redirect_cache_size: 100,
            query_validity_secs: 5,
            address_query_validity_secs: 5,
            reap_interval_secs: 15,
            iterative_lookup: false,
            root_server_addr: None,
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference() {
        let config = Config::default();
        assert_eq!(config.server_port, 5022);
        assert_eq!(config.assertion_cache_size, 10_000);
        assert_eq!(config.normal_worker_count, 10);
        assert!(!config.iterative_lookup);
        assert_eq!(
            config.server_conn().addr.to_string(),
            "127.0.0.1:5022"
        );
    }
}
