//! Server and client configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Port a client dials when none is given
pub const DEFAULT_CLIENT_PORT: u16 = 51555;

/// How long the partner typing indicator stays on without a refresh
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum spacing between outgoing typing notifications
pub const DEFAULT_TYPING_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Listening side configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_addr: IpAddr,
    /// Port to bind; 0 lets the OS pick one
    pub port: u16,
    /// Delay before each pairing attempt; zero pairs immediately
    pub pairing_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            pairing_delay: Duration::ZERO,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, bind_addr: IpAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_pairing_delay(mut self, pairing_delay: Duration) -> Self {
        self.pairing_delay = pairing_delay;
        self
    }
}

/// Connecting side configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Host running the matchmaking server
    pub host: IpAddr,
    /// Port used when the caller has none
    pub default_port: u16,
    /// Partner typing indicator timeout
    pub typing_timeout: Duration,
    /// Rate limit for outgoing typing notifications
    pub typing_send_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            default_port: DEFAULT_CLIENT_PORT,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            typing_send_interval: DEFAULT_TYPING_SEND_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn with_typing_timeout(mut self, typing_timeout: Duration) -> Self {
        self.typing_timeout = typing_timeout;
        self
    }

    pub fn with_typing_send_interval(mut self, interval: Duration) -> Self {
        self.typing_send_interval = interval;
        self
    }
}
