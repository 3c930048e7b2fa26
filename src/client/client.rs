use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use anyhow::Context;
use tokio::net::UdpSocket;

use super::config::ClientConfig;
use crate::core::{Packet, Receiver, RetryTimer, Sender, Step, Transfer};

enum Event {
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Timeout,
}

/// TFTP client
///
/// Supports file upload (PUT) and download (GET) operations
///
/// # Example
///
/// ```rust,no_run
/// use rtftp::client::{Client, ClientConfig};
/// use std::path::Path;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ClientConfig::new("192.168.1.100".parse()?, 20069);
///     let client = Client::new(config)?;
///
///     // Download file
///     client.get("remote.txt", Path::new("local.txt")).await?;
///
///     // Upload file
///     client.put(Path::new("local.txt"), "remote.txt").await?;
///     Ok(())
/// }
/// ```
pub struct Client {
    config: ClientConfig,
}

impl Client {
    /// Create a new TFTP client
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        Ok(Self { config })
    }

    /// Download a file from the server (RRQ - Read Request)
    ///
    /// # Arguments
    ///
    /// * `remote_file` - File name on the server
    /// * `local_file` - Local save path
    pub async fn get(&self, remote_file: &str, local_file: &Path) -> anyhow::Result<()> {
        log::info!("Downloading {} to {}", remote_file, local_file.display());

        let file = File::create(local_file)
            .with_context(|| format!("failed to create {}", local_file.display()))?;
        let request = Packet::Rrq {
            filename: remote_file.to_string(),
            mode: self.config.mode.clone(),
        };
        let transfer = Transfer::Receiving(Receiver::with_request(
            file,
            self.config.max_retries,
            request.clone(),
        ));

        let bytes = self.drive(request, transfer).await?;
        log::info!(
            "Download complete: {} ({} bytes)",
            local_file.display(),
            bytes
        );
        Ok(())
    }

    /// Upload a file to the server (WRQ - Write Request)
    ///
    /// # Arguments
    ///
    /// * `local_file` - Local file path
    /// * `remote_file` - File name on the server
    pub async fn put(&self, local_file: &Path, remote_file: &str) -> anyhow::Result<()> {
        log::info!("Uploading {} to {}", local_file.display(), remote_file);

        if !local_file.exists() {
            return Err(anyhow::anyhow!("Local file does not exist"));
        }
        let file = File::open(local_file)
            .with_context(|| format!("failed to open {}", local_file.display()))?;
        let request = Packet::Wrq {
            filename: remote_file.to_string(),
            mode: self.config.mode.clone(),
        };
        let transfer = Transfer::Sending(Sender::with_request(
            file,
            self.config.max_retries,
            request.clone(),
        ));

        let bytes = self.drive(request, transfer).await?;
        log::info!("Upload complete: {} ({} bytes)", remote_file, bytes);
        Ok(())
    }

    /// Send the request and pump the transfer until it is over
    async fn drive(&self, request: Packet, mut transfer: Transfer<File, File>) -> anyhow::Result<u64> {
        let server_addr = SocketAddr::new(self.config.server_ip, self.config.server_port);
        let bind_addr = match server_addr {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("failed to bind a local socket")?;

        let policy = self.config.retry_policy();
        let mut timer = RetryTimer::new();

        // The request goes to the well-known port; the reply arrives
        // from the ephemeral port the server picked for this transfer
        socket.send_to(&request.serialize(), server_addr).await?;
        timer.arm(policy.interval(0));
        let mut peer: Option<SocketAddr> = None;

        let mut buf = vec![0u8; 65536];
        loop {
            let event = tokio::select! {
                recv = socket.recv_from(&mut buf) => Event::Datagram(recv),
                _ = timer.fire() => Event::Timeout,
            };

            let step = match event {
                Event::Datagram(Ok((amt, from))) => {
                    if peer.is_some_and(|locked| locked != from) {
                        log::debug!("Ignoring datagram from unrelated {}", from);
                        continue;
                    }
                    match Packet::deserialize(&buf[..amt]) {
                        Ok(packet) => {
                            // Lock onto the first address that answers
                            // with a well-formed packet
                            if peer.is_none() {
                                peer = Some(from);
                            }
                            transfer.on_packet(packet)
                        }
                        Err(e) => {
                            log::debug!("Ignoring undecodable datagram from {}: {}", from, e);
                            continue;
                        }
                    }
                }
                Event::Datagram(Err(e)) => {
                    return Err(e).context("receive on the transfer socket failed");
                }
                Event::Timeout => transfer.on_timeout(),
            };

            let to = peer.unwrap_or(server_addr);
            match step {
                Step::Send(packet) | Step::Resend(packet) => {
                    socket.send_to(&packet.serialize(), to).await?;
                    timer.arm(policy.interval(transfer.retries()));
                }
                Step::Ignore => {}
                Step::Finish(reply) => {
                    if let Some(packet) = reply {
                        socket.send_to(&packet.serialize(), to).await?;
                    }
                    return Ok(transfer.bytes_transferred());
                }
                Step::Fail(reply, error) => {
                    if let Some(packet) = reply {
                        socket.send_to(&packet.serialize(), to).await?;
                    }
                    return Err(error.into());
                }
            }
        }
    }
}
