use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::core::{Backoff, RetryPolicy};
use crate::server::DEFAULT_PORT;

/// TFTP client configuration
///
/// # Example
///
/// ```rust
/// use rtftp::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("192.168.1.100".parse().unwrap(), 69)
///     .with_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server IP address
    pub server_ip: IpAddr,
    /// Server port number
    pub server_port: u16,
    /// Transfer mode sent with each request
    pub mode: String,
    /// Wait per retransmission before giving up on a reply
    pub timeout: Duration,
    /// Retransmissions before a transfer is abandoned
    pub max_retries: u32,
    /// How the retransmission interval grows
    pub backoff: Backoff,
}

impl ClientConfig {
    /// Create new client configuration
    ///
    /// # Arguments
    ///
    /// * `server_ip` - Server IP address
    /// * `server_port` - Server port number
    pub fn new(server_ip: IpAddr, server_port: u16) -> Self {
        Self {
            server_ip,
            server_port,
            mode: "octet".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 5,
            backoff: Backoff::Fixed,
        }
    }

    /// Set the transfer mode
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Set the retransmission timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retransmission budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff strategy
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Retransmission policy for transfers with this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.timeout,
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT)
    }
}
