//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::hub::HubConfig;
use crate::scan::{DEFAULT_CLAIM_TIMEOUT, DEFAULT_SCAN_BUFFER};

use super::connection::Heartbeat;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Time allowed to write a message to the peer
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between inbound frames (pongs included) before the peer is
/// considered dead
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Largest inbound WebSocket message accepted from a peer
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent WebSocket subscribers (0 = unlimited)
    pub max_connections: usize,

    /// Deadline for each outbound write, keepalive pings included
    pub write_wait: Duration,

    /// Read deadline, refreshed by any inbound frame
    pub pong_wait: Duration,

    /// Keepalive ping interval; must be shorter than `pong_wait`
    pub ping_period: Duration,

    /// Maximum inbound message size in bytes
    pub max_message_size: usize,

    /// How long `/api/scan` waits for a scan
    pub claim_timeout: Duration,

    /// Scans buffered between the reader task and the dispatcher
    pub scan_buffer: usize,

    /// Broadcast hub settings
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: ping_period_for(DEFAULT_PONG_WAIT),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            scan_buffer: DEFAULT_SCAN_BUFFER,
            hub: HubConfig::default(),
        }
    }
}

/// Pings go out at 9/10 of the read deadline so a healthy peer's pong
/// always lands before it expires
fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the outbound write deadline
    pub fn write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = wait;
        self
    }

    /// Set the read deadline; the ping period follows at 9/10 of it
    pub fn pong_wait(mut self, wait: Duration) -> Self {
        self.pong_wait = wait;
        self.ping_period = ping_period_for(wait);
        self
    }

    /// Set the maximum inbound message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the claim timeout
    pub fn claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Set the per-subscriber outbound buffer
    pub fn subscriber_buffer(mut self, capacity: usize) -> Self {
        self.hub = self.hub.subscriber_buffer(capacity);
        self
    }

    /// Set the scan buffer
    pub fn scan_buffer(mut self, capacity: usize) -> Self {
        self.scan_buffer = capacity.max(1);
        self
    }

    /// Liveness settings for each subscriber connection
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            write_wait: self.write_wait,
            pong_wait: self.pong_wait,
            ping_period: self.ping_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert_eq!(config.max_message_size, 512);
        assert_eq!(config.claim_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 9090);
    }

    #[test]
    fn test_builder_pong_wait_moves_ping_period() {
        let config = ServerConfig::default().pong_wait(Duration::from_secs(10));

        assert_eq!(config.pong_wait, Duration::from_secs(10));
        assert_eq!(config.ping_period, Duration::from_secs(9));
        assert!(config.ping_period < config.pong_wait);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .write_wait(Duration::from_secs(2))
            .claim_timeout(Duration::from_secs(1))
            .subscriber_buffer(8)
            .scan_buffer(0);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.write_wait, Duration::from_secs(2));
        assert_eq!(config.claim_timeout, Duration::from_secs(1));
        assert_eq!(config.hub.subscriber_buffer, 8);
        assert_eq!(config.scan_buffer, 1);
    }

    #[test]
    fn test_heartbeat_from_config() {
        let heartbeat = ServerConfig::default().heartbeat();

        assert_eq!(heartbeat.write_wait, DEFAULT_WRITE_WAIT);
        assert_eq!(heartbeat.pong_wait, DEFAULT_PONG_WAIT);
        assert_eq!(heartbeat.ping_period, Duration::from_secs(54));
    }
}
