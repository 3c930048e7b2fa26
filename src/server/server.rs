use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::config::{Config, DuplicatePolicy};
use super::storage::{DirStorage, Storage, StorageError};
use super::worker::Worker;
use crate::core::{ErrorCode, Mode, Packet, Receiver, Sender, Transfer};

/// Datagrams queued per session before the dispatcher starts dropping
const INBOX_DEPTH: usize = 16;

/// Routing entry for one live session
#[derive(Clone)]
struct SessionHandle {
    id: u64,
    inbox: mpsc::Sender<Vec<u8>>,
}

/// Peer address to session routing table, shared between the dispatcher
/// and the session guards
#[derive(Clone, Default)]
struct Sessions {
    inner: Arc<Mutex<HashMap<SocketAddr, SessionHandle>>>,
}

impl Sessions {
    fn table(&self) -> MutexGuard<'_, HashMap<SocketAddr, SessionHandle>> {
        // Keep routing alive even if a holder panicked with the lock
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, peer: SocketAddr) -> Option<SessionHandle> {
        self.table().get(&peer).cloned()
    }

    fn insert(&self, peer: SocketAddr, handle: SessionHandle) {
        self.table().insert(peer, handle);
    }

    fn remove(&self, peer: SocketAddr) {
        self.table().remove(&peer);
    }

    /// Remove the entry for `peer` only while it still belongs to
    /// session `id`, so a finished worker cannot evict its replacement
    fn release(&self, peer: SocketAddr, id: u64) {
        let mut table = self.table();
        if table.get(&peer).is_some_and(|handle| handle.id == id) {
            table.remove(&peer);
        }
    }

    fn len(&self) -> usize {
        self.table().len()
    }
}

/// Removes a session's routing entry when its worker ends, whatever the
/// exit path
pub(crate) struct SessionGuard {
    sessions: Sessions,
    peer: SocketAddr,
    id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.release(self.peer, self.id);
    }
}

/// Control handle for a running [`Server`]
///
/// Cheap to clone and safe to use from other tasks.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    sessions: Sessions,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Address the dispatcher socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of transfers currently in flight
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Ask the dispatcher and every live session to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

enum Tick {
    Recv(std::io::Result<(usize, SocketAddr)>),
    Joined(Result<(), tokio::task::JoinError>),
    Shutdown,
}

/// TFTP session dispatcher
///
/// Listens on the well-known port. A valid read or write request spawns
/// a session task with its own ephemeral socket; later datagrams from a
/// registered peer address are forwarded to its session untouched, so a
/// retransmitted request never starts a second transfer.
///
/// # Example
///
/// ```rust,no_run
/// use rtftp::server::{Config, Server};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::with_defaults();
///     let server = Server::new(&config).await?;
///     server.run().await
/// }
/// ```
pub struct Server {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: Config,
    storage: Arc<dyn Storage>,
    sessions: Sessions,
    workers: JoinSet<()>,
    shutdown: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    next_id: u64,
}

impl Server {
    /// Bind the dispatcher socket and serve files under
    /// `config.directory`
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        if !config.directory.is_dir() {
            anyhow::bail!("directory does not exist: {}", config.directory.display());
        }
        let storage = DirStorage::new(config.directory.clone())
            .with_read_only(config.read_only)
            .with_overwrite(config.overwrite);
        Self::with_storage(config, Arc::new(storage)).await
    }

    /// Bind the dispatcher socket with caller-provided storage
    pub async fn with_storage(config: &Config, storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(config.listen_addr())
            .await
            .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
        let local_addr = socket.local_addr().context("failed to read local address")?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        Ok(Self {
            socket,
            local_addr,
            config: config.clone(),
            storage,
            sessions: Sessions::default(),
            workers: JoinSet::new(),
            shutdown: Arc::new(shutdown),
            shutdown_rx,
            next_id: 0,
        })
    }

    /// Address the dispatcher socket is bound to; useful when the
    /// configured port was 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Control handle for stopping the server from another task
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
            sessions: self.sessions.clone(),
            local_addr: self.local_addr,
        }
    }

    /// Serve requests until shutdown is requested, then wait for the
    /// active sessions to wind down
    pub async fn run(mut self) -> anyhow::Result<()> {
        log::info!("TFTP server listening on {}", self.local_addr);

        let mut buf = vec![0u8; 65536];
        loop {
            let tick = tokio::select! {
                recv = self.socket.recv_from(&mut buf) => Tick::Recv(recv),
                _ = self.shutdown_rx.changed() => Tick::Shutdown,
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    Tick::Joined(joined)
                }
            };

            match tick {
                Tick::Recv(Ok((amt, peer))) => self.on_datagram(peer, &buf[..amt]).await,
                Tick::Recv(Err(e)) => log::warn!("Receive error on server socket: {}", e),
                Tick::Joined(Err(e)) if e.is_panic() => {
                    log::error!("Session task panicked: {}", e);
                }
                Tick::Joined(_) => {}
                Tick::Shutdown => break,
            }
        }

        let active = self.sessions.len();
        if active > 0 {
            log::info!("Shutting down, waiting for {} active sessions", active);
        }
        while self.workers.join_next().await.is_some() {}
        log::info!("TFTP server stopped");
        Ok(())
    }

    async fn on_datagram(&mut self, peer: SocketAddr, datagram: &[u8]) {
        if let Some(handle) = self.sessions.lookup(peer) {
            if self.config.duplicate_requests == DuplicatePolicy::Replace {
                if let Ok(request @ (Packet::Rrq { .. } | Packet::Wrq { .. })) =
                    Packet::deserialize(datagram)
                {
                    log::info!("Replacing live session for {} with a new request", peer);
                    // Dropping the inbox sender tells the old worker it
                    // has been superseded
                    self.sessions.remove(peer);
                    self.start_session(peer, request).await;
                    return;
                }
            }
            // Forward raw bytes; a retransmitted request lands in the
            // session and is ignored there
            if handle.inbox.try_send(datagram.to_vec()).is_err() {
                log::debug!("Session for {} not taking datagrams, dropping one", peer);
            }
            return;
        }

        let packet = match Packet::deserialize(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("Ignoring undecodable datagram from {}: {}", peer, e);
                return;
            }
        };
        match packet {
            Packet::Rrq { .. } | Packet::Wrq { .. } => self.start_session(peer, packet).await,
            // An error must never provoke another error
            Packet::Error { code, msg } => {
                log::debug!("Ignoring stray error {} from {}: {}", code, peer, msg);
            }
            _ => {
                log::debug!("Stray {:?} from {} without a session", packet.opcode(), peer);
                self.reply(peer, Packet::error(ErrorCode::IllegalOperation))
                    .await;
            }
        }
    }

    async fn start_session(&mut self, peer: SocketAddr, request: Packet) {
        let (filename, mode, write) = match &request {
            Packet::Rrq { filename, mode } => (filename.clone(), mode.clone(), false),
            Packet::Wrq { filename, mode } => (filename.clone(), mode.clone(), true),
            _ => return,
        };
        if write {
            log::info!("Write request from {}: {:?} ({})", peer, filename, mode);
        } else {
            log::info!("Read request from {}: {:?} ({})", peer, filename, mode);
        }

        if self.sessions.len() >= self.config.max_sessions {
            log::warn!(
                "Refusing {}: {} sessions already active",
                peer,
                self.config.max_sessions
            );
            let busy = Packet::Error {
                code: ErrorCode::DiskFull,
                msg: "too many concurrent transfers".to_string(),
            };
            self.reply(peer, busy).await;
            return;
        }

        match mode.parse::<Mode>() {
            // Netascii is served as raw octets; no line ending rewrite
            Ok(Mode::Netascii) | Ok(Mode::Octet) => {}
            Ok(Mode::Mail) => {
                log::warn!("Refusing mail mode request from {}", peer);
                let refused = Packet::Error {
                    code: ErrorCode::IllegalOperation,
                    msg: "mail mode is not supported".to_string(),
                };
                self.reply(peer, refused).await;
                return;
            }
            Err(_) => {
                log::warn!("Unknown transfer mode {:?} from {}", mode, peer);
                let refused = Packet::Error {
                    code: ErrorCode::IllegalOperation,
                    msg: format!("unknown transfer mode {:?}", mode),
                };
                self.reply(peer, refused).await;
                return;
            }
        }

        let transfer = if write {
            match self.storage.open_sink(&filename) {
                Ok(sink) => Transfer::Receiving(Receiver::new(sink, self.config.max_retries)),
                Err(e) => {
                    self.refuse(peer, &filename, e).await;
                    return;
                }
            }
        } else {
            match self.storage.open_source(&filename) {
                Ok(source) => Transfer::Sending(Sender::new(source, self.config.max_retries)),
                Err(e) => {
                    self.refuse(peer, &filename, e).await;
                    return;
                }
            }
        };

        // Fresh socket per transfer; its ephemeral port is the server
        // side transfer identifier
        let socket = match UdpSocket::bind(SocketAddr::new(self.config.ip_address, 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("Failed to bind a transfer socket: {}", e);
                let reply = Packet::Error {
                    code: ErrorCode::NotDefined,
                    msg: "cannot allocate a transfer socket".to_string(),
                };
                self.reply(peer, reply).await;
                return;
            }
        };

        self.next_id += 1;
        let id = self.next_id;
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_DEPTH);
        let guard = SessionGuard {
            sessions: self.sessions.clone(),
            peer,
            id,
        };
        // Route before spawning so no datagram slips past the session
        self.sessions.insert(
            peer,
            SessionHandle {
                id,
                inbox: inbox_tx,
            },
        );

        let worker = Worker::new(
            socket,
            peer,
            filename,
            transfer,
            inbox_rx,
            self.config.retry_policy(),
            self.shutdown.subscribe(),
            guard,
        );
        self.workers.spawn(worker.run());
    }

    /// The reply carries the standard message for the code; the detail
    /// stays in the server log rather than on the wire
    async fn refuse(&self, peer: SocketAddr, filename: &str, error: StorageError) {
        log::warn!("Refusing {:?} for {}: {}", filename, peer, error);
        self.reply(peer, Packet::error(error.error_code())).await;
    }

    async fn reply(&self, peer: SocketAddr, packet: Packet) {
        if let Err(e) = self.socket.send_to(&packet.serialize(), peer).await {
            log::warn!("Failed to reply to {}: {}", peer, e);
        }
    }
}
