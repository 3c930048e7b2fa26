use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{Backoff, RetryPolicy};

/// Default listening port, above the privileged range (the standard
/// TFTP port 69 needs elevated rights)
pub const DEFAULT_PORT: u16 = 20069;

/// Policy for a repeated RRQ/WRQ from an address that already has a
/// live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Hand the datagram to the existing session; its retransmission
    /// timer recovers a lost first reply
    #[default]
    Ignore,
    /// Abort the existing session and serve the new request
    Replace,
}

/// TFTP server configuration
///
/// All fields have working defaults and can be loaded from a TOML file,
/// overridden from the command line, or set through the `with_*`
/// builders.
///
/// # Example
///
/// ```rust
/// use rtftp::server::Config;
/// use std::path::PathBuf;
///
/// let config = Config::new(
///     "127.0.0.1".parse().unwrap(),
///     20069,
///     PathBuf::from("/tmp/tftp"),
///     false,
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IP address to listen on
    pub ip_address: IpAddr,
    /// Port number to listen on
    pub port: u16,
    /// Directory served for reads and writes
    pub directory: PathBuf,
    /// Reject all write requests
    pub read_only: bool,
    /// Let uploads replace existing files
    pub overwrite: bool,
    /// Maximum number of concurrent transfers
    pub max_sessions: usize,
    /// What to do with a repeated request from a live session's address
    pub duplicate_requests: DuplicatePolicy,
    /// Time to wait for the next packet before retransmitting
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retransmissions allowed before a session is abandoned
    pub max_retries: u32,
    /// Interval growth across consecutive retries
    pub backoff: Backoff,
}

impl Config {
    /// Create a new configuration
    ///
    /// # Arguments
    ///
    /// * `ip_address` - IP address to listen on
    /// * `port` - Port number to listen on
    /// * `directory` - Root directory for files
    /// * `read_only` - Whether to reject write requests
    pub fn new(ip_address: IpAddr, port: u16, directory: PathBuf, read_only: bool) -> Self {
        Self {
            ip_address,
            port,
            directory,
            read_only,
            ..Self::default()
        }
    }

    /// Configuration with built-in defaults
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Overlay command line values on this configuration
    pub fn merge_cli(
        mut self,
        ip_address: Option<IpAddr>,
        port: Option<u16>,
        directory: Option<PathBuf>,
        read_only: bool,
        no_overwrite: bool,
    ) -> Self {
        if let Some(ip_address) = ip_address {
            self.ip_address = ip_address;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(directory) = directory {
            self.directory = directory;
        }
        self.read_only |= read_only;
        if no_overwrite {
            self.overwrite = false;
        }
        self
    }

    /// Set the served directory
    pub fn with_directory(mut self, directory: PathBuf) -> Self {
        self.directory = directory;
        self
    }

    /// Set whether uploads may replace existing files
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set the concurrent transfer limit
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Set the duplicate request policy
    pub fn with_duplicate_requests(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_requests = policy;
        self
    }

    /// Set the retransmission timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Socket address the dispatcher binds
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }

    /// Retry policy handed to each session
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.timeout,
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            directory: std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()),
            read_only: false,
            overwrite: true,
            max_sessions: 64,
            duplicate_requests: DuplicatePolicy::Ignore,
            timeout: Duration::from_secs(5),
            max_retries: 5,
            backoff: Backoff::Fixed,
        }
    }
}
