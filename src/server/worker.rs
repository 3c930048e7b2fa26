use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use super::server::SessionGuard;
use super::storage::{Sink, Source};
use crate::core::{ErrorCode, Packet, RetryPolicy, RetryTimer, Step, Transfer, TransferError};

/// How a session ended
enum Outcome {
    /// Transfer ran to completion; payload bytes moved
    Done(u64),
    Failed(TransferError),
    /// Server shutdown requested
    Cancelled,
    /// A new request from the same address replaced this session
    Superseded,
}

/// What woke the session up
enum Event {
    Socket(std::io::Result<(usize, SocketAddr)>),
    Inbox(Option<Vec<u8>>),
    Timeout,
    Shutdown,
}

/// One transfer session: pumps its own ephemeral socket, the datagrams
/// the dispatcher forwards, and the retransmission timer through the
/// state machine until the transfer is over
pub(crate) struct Worker {
    socket: UdpSocket,
    peer: SocketAddr,
    filename: String,
    transfer: Transfer<Source, Sink>,
    inbox: mpsc::Receiver<Vec<u8>>,
    policy: RetryPolicy,
    timer: RetryTimer,
    shutdown: watch::Receiver<bool>,
    _guard: SessionGuard,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        socket: UdpSocket,
        peer: SocketAddr,
        filename: String,
        transfer: Transfer<Source, Sink>,
        inbox: mpsc::Receiver<Vec<u8>>,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
        guard: SessionGuard,
    ) -> Self {
        Self {
            socket,
            peer,
            filename,
            transfer,
            inbox,
            policy,
            timer: RetryTimer::new(),
            shutdown,
            _guard: guard,
        }
    }

    pub(crate) async fn run(mut self) {
        match self.drive().await {
            Outcome::Done(bytes) => match &self.transfer {
                Transfer::Sending(_) => {
                    log::info!("Sent {:?} to {}, {} bytes", self.filename, self.peer, bytes);
                }
                Transfer::Receiving(_) => {
                    log::info!(
                        "Received {:?} from {}, {} bytes",
                        self.filename,
                        self.peer,
                        bytes
                    );
                }
            },
            Outcome::Failed(error) => {
                log::warn!(
                    "Transfer of {:?} with {} failed: {}",
                    self.filename,
                    self.peer,
                    error
                );
            }
            Outcome::Cancelled => {
                log::info!(
                    "Transfer of {:?} with {} cancelled by shutdown",
                    self.filename,
                    self.peer
                );
            }
            Outcome::Superseded => {
                log::info!(
                    "Transfer of {:?} with {} superseded by a new request",
                    self.filename,
                    self.peer
                );
            }
        }
    }

    async fn drive(&mut self) -> Outcome {
        if *self.shutdown.borrow() {
            return Outcome::Cancelled;
        }

        // First DATA block for a download, ACK 0 for an upload
        let step = self.transfer.begin();
        if let Some(outcome) = self.act(step).await {
            return outcome;
        }

        let mut buf = vec![0u8; 65536];
        loop {
            let event = tokio::select! {
                recv = self.socket.recv_from(&mut buf) => Event::Socket(recv),
                forwarded = self.inbox.recv() => Event::Inbox(forwarded),
                _ = self.timer.fire() => Event::Timeout,
                _ = self.shutdown.changed() => Event::Shutdown,
            };

            let step = match event {
                Event::Socket(Ok((amt, from))) => {
                    if from != self.peer {
                        // Third party hit our transfer socket; tell it
                        // off without disturbing the transfer
                        let unknown = Packet::error(ErrorCode::UnknownTransferId);
                        let _ = self.socket.send_to(&unknown.serialize(), from).await;
                        log::debug!("Sent unknown transfer ID error to {}", from);
                        continue;
                    }
                    match Packet::deserialize(&buf[..amt]) {
                        Ok(packet) => self.transfer.on_packet(packet),
                        Err(e) => {
                            log::debug!("Ignoring undecodable datagram from {}: {}", from, e);
                            continue;
                        }
                    }
                }
                Event::Socket(Err(e)) => {
                    log::warn!("Receive error on transfer socket for {}: {}", self.peer, e);
                    continue;
                }
                Event::Inbox(Some(datagram)) => match Packet::deserialize(&datagram) {
                    Ok(packet) => self.transfer.on_packet(packet),
                    Err(e) => {
                        log::debug!(
                            "Ignoring undecodable forwarded datagram from {}: {}",
                            self.peer,
                            e
                        );
                        continue;
                    }
                },
                Event::Inbox(None) => return Outcome::Superseded,
                Event::Timeout => self.transfer.on_timeout(),
                Event::Shutdown => return Outcome::Cancelled,
            };

            if let Some(outcome) = self.act(step).await {
                return outcome;
            }
        }
    }

    /// Carry out one step from the state machine; `Some` ends the session
    async fn act(&mut self, step: Step) -> Option<Outcome> {
        match step {
            Step::Send(packet) => {
                match &packet {
                    Packet::Data { block_num, data } => {
                        log::debug!(
                            "Sending block {} ({} bytes) to {}",
                            block_num,
                            data.len(),
                            self.peer
                        );
                    }
                    Packet::Ack(block_num) => {
                        log::debug!("Acknowledging block {} to {}", block_num, self.peer);
                    }
                    _ => {}
                }
                self.transmit(&packet).await;
                self.timer.arm(self.policy.interval(self.transfer.retries()));
                None
            }
            Step::Resend(packet) => {
                log::debug!(
                    "Retransmitting {:?} to {} (retry {}/{})",
                    packet.opcode(),
                    self.peer,
                    self.transfer.retries(),
                    self.policy.max_retries
                );
                self.transmit(&packet).await;
                self.timer.arm(self.policy.interval(self.transfer.retries()));
                None
            }
            Step::Ignore => None,
            Step::Finish(reply) => {
                if let Some(packet) = reply {
                    self.transmit(&packet).await;
                }
                self.timer.disarm();
                Some(Outcome::Done(self.transfer.bytes_transferred()))
            }
            Step::Fail(reply, error) => {
                if let Some(packet) = reply {
                    self.transmit(&packet).await;
                }
                self.timer.disarm();
                Some(Outcome::Failed(error))
            }
        }
    }

    async fn transmit(&self, packet: &Packet) {
        if let Err(e) = self.socket.send_to(&packet.serialize(), self.peer).await {
            // The timer will try again; a send error is not terminal
            log::warn!("Failed to send to {}: {}", self.peer, e);
        }
    }
}
