use std::io::{self, Read, Write};

use thiserror::Error;

use crate::core::packet::{ErrorCode, Packet, BLOCK_SIZE};

/// Why a transfer ended in [`State::Failed`]
#[derive(Debug, Error)]
pub enum TransferError {
    /// Peer sent a well-formed packet that does not fit the expected
    /// sequence
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Reading the source or writing the sink failed
    #[error("resource error: {0}")]
    Resource(#[from] io::Error),
    /// Peer reported an error and abandoned the transfer
    #[error("peer error {code}: {msg}")]
    Peer { code: ErrorCode, msg: String },
    /// Retry budget exhausted with no reply; peer presumed gone
    #[error("transfer timed out")]
    TimedOut,
}

/// Transfer session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Request sent, waiting for ACK 0 before the first data block
    AwaitingFirstAck,
    /// Sending file data, waiting for the ACK of the block in flight
    SendingData,
    /// Waiting for the next data block
    AwaitingData,
    /// Transfer completed
    Done,
    /// Transfer aborted
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Failed)
    }
}

/// One protocol action for the driving loop to carry out
///
/// The state machine never touches a socket or a clock itself; every
/// transition returns a `Step` describing what the caller should do.
#[derive(Debug)]
pub enum Step {
    /// Transmit a packet that advances the transfer and restart the
    /// retransmission timer
    Send(Packet),
    /// Transmit a repeat of an earlier packet
    Resend(Packet),
    /// Drop the incoming packet and keep waiting
    Ignore,
    /// Transfer complete; transmit the enclosed packet first if present
    Finish(Option<Packet>),
    /// Transfer failed; transmit the enclosed ERROR first if present
    Fail(Option<Packet>, TransferError),
}

/// Where a received block number stands relative to the expected one,
/// modulo 65536: anything in the half-range behind counts as old
enum BlockOrder {
    Expected,
    Behind,
    Ahead,
}

fn classify(expected: u16, got: u16) -> BlockOrder {
    match got.wrapping_sub(expected) {
        0 => BlockOrder::Expected,
        1..=0x8000 => BlockOrder::Ahead,
        _ => BlockOrder::Behind,
    }
}

/// Read until `buf` is full or the source is exhausted
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn resource_failure(err: io::Error) -> Step {
    let reply = Packet::Error {
        code: ErrorCode::from_io(&err),
        msg: err.to_string(),
    };
    Step::Fail(Some(reply), TransferError::Resource(err))
}

/// Sending side of a transfer: reads a byte source and pushes DATA
/// blocks in lock step with the peer's ACKs
///
/// Covers a server answering an RRQ ([`Sender::new`]) and a client
/// uploading after a WRQ ([`Sender::with_request`]).
///
/// # Example
///
/// ```rust
/// use rtftp::core::{Packet, Sender, Step};
/// use std::io::Cursor;
///
/// let mut sender = Sender::new(Cursor::new(b"hello".to_vec()), 5);
/// match sender.begin() {
///     Step::Send(Packet::Data { block_num: 1, data }) => assert_eq!(data, b"hello"),
///     other => panic!("unexpected step {:?}", other),
/// }
/// ```
#[derive(Debug)]
pub struct Sender<R: Read> {
    source: R,
    state: State,
    /// Block number of the DATA packet in flight
    block_num: u16,
    final_block: bool,
    last_packet: Option<Packet>,
    retries: u32,
    max_retries: u32,
    bytes_sent: u64,
}

impl<R: Read> Sender<R> {
    /// Sender for a server-side download; [`Sender::begin`] produces the
    /// first DATA block
    pub fn new(source: R, max_retries: u32) -> Self {
        Self {
            source,
            state: State::SendingData,
            block_num: 0,
            final_block: false,
            last_packet: None,
            retries: 0,
            max_retries,
            bytes_sent: 0,
        }
    }

    /// Sender for a client-side upload: `request` is the WRQ already on
    /// the wire, retransmitted on timeout until ACK 0 arrives
    pub fn with_request(source: R, max_retries: u32, request: Packet) -> Self {
        Self {
            source,
            state: State::AwaitingFirstAck,
            block_num: 0,
            final_block: false,
            last_packet: Some(request),
            retries: 0,
            max_retries,
            bytes_sent: 0,
        }
    }

    /// Kick off a server-side download with the first DATA block
    pub fn begin(&mut self) -> Step {
        self.send_next()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total payload bytes sent, duplicates excluded
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_sent
    }

    /// Feed one decoded packet from the peer into the state machine
    pub fn on_packet(&mut self, packet: Packet) -> Step {
        if self.state.is_terminal() {
            return Step::Ignore;
        }
        match packet {
            Packet::Ack(block_num) => self.on_ack(block_num),
            // A repeated request means our last reply was lost; the
            // retransmission timer covers it
            Packet::Rrq { .. } | Packet::Wrq { .. } => Step::Ignore,
            Packet::Error { code, msg } => {
                self.state = State::Failed;
                Step::Fail(None, TransferError::Peer { code, msg })
            }
            Packet::Data { .. } => {
                self.state = State::Failed;
                let error = TransferError::Protocol("unexpected DATA on the sending side".to_string());
                Step::Fail(Some(Packet::error(ErrorCode::IllegalOperation)), error)
            }
        }
    }

    /// The retransmission timer fired
    pub fn on_timeout(&mut self) -> Step {
        if self.state.is_terminal() {
            return Step::Ignore;
        }
        if self.retries >= self.max_retries {
            self.state = State::Failed;
            return Step::Fail(None, TransferError::TimedOut);
        }
        self.retries += 1;
        match &self.last_packet {
            Some(packet) => Step::Resend(packet.clone()),
            None => Step::Ignore,
        }
    }

    fn on_ack(&mut self, block_num: u16) -> Step {
        let expected = match self.state {
            State::AwaitingFirstAck => 0,
            _ => self.block_num,
        };
        match classify(expected, block_num) {
            BlockOrder::Expected => {
                if self.state == State::SendingData && self.final_block {
                    self.state = State::Done;
                    return Step::Finish(None);
                }
                self.send_next()
            }
            // Stale ACK: the timer decides whether to retransmit
            BlockOrder::Behind => Step::Ignore,
            BlockOrder::Ahead => {
                self.state = State::Failed;
                let error = TransferError::Protocol(format!(
                    "ACK for block {} ahead of block {}",
                    block_num, expected
                ));
                Step::Fail(Some(Packet::error(ErrorCode::IllegalOperation)), error)
            }
        }
    }

    fn send_next(&mut self) -> Step {
        let mut buf = vec![0u8; BLOCK_SIZE];
        match read_full(&mut self.source, &mut buf) {
            Ok(n) => {
                self.block_num = self.block_num.wrapping_add(1);
                self.final_block = n < BLOCK_SIZE;
                self.bytes_sent += n as u64;
                self.retries = 0;
                self.state = State::SendingData;
                buf.truncate(n);
                let packet = Packet::Data {
                    block_num: self.block_num,
                    data: buf,
                };
                self.last_packet = Some(packet.clone());
                Step::Send(packet)
            }
            Err(e) => {
                self.state = State::Failed;
                resource_failure(e)
            }
        }
    }
}

/// Receiving side of a transfer: writes incoming DATA blocks to a byte
/// sink and answers each with its ACK
///
/// Covers a server accepting a WRQ ([`Receiver::new`]) and a client
/// downloading after an RRQ ([`Receiver::with_request`]).
#[derive(Debug)]
pub struct Receiver<W: Write> {
    sink: W,
    state: State,
    /// Block number of the last DATA written and acknowledged
    block_num: u16,
    last_packet: Option<Packet>,
    retries: u32,
    max_retries: u32,
    bytes_received: u64,
}

impl<W: Write> Receiver<W> {
    /// Receiver for a server-side upload; [`Receiver::begin`] produces
    /// the ACK 0 that accepts the request
    pub fn new(sink: W, max_retries: u32) -> Self {
        Self {
            sink,
            state: State::AwaitingData,
            block_num: 0,
            last_packet: None,
            retries: 0,
            max_retries,
            bytes_received: 0,
        }
    }

    /// Receiver for a client-side download: `request` is the RRQ already
    /// on the wire, retransmitted on timeout until the first DATA block
    /// arrives
    pub fn with_request(sink: W, max_retries: u32, request: Packet) -> Self {
        Self {
            sink,
            state: State::AwaitingData,
            block_num: 0,
            last_packet: Some(request),
            retries: 0,
            max_retries,
            bytes_received: 0,
        }
    }

    /// Kick off a server-side upload by acknowledging the request
    pub fn begin(&mut self) -> Step {
        let ack = Packet::Ack(0);
        self.last_packet = Some(ack.clone());
        Step::Send(ack)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total payload bytes written, duplicates excluded
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_received
    }

    /// Feed one decoded packet from the peer into the state machine
    pub fn on_packet(&mut self, packet: Packet) -> Step {
        if self.state.is_terminal() {
            return Step::Ignore;
        }
        match packet {
            Packet::Data { block_num, data } => self.on_data(block_num, data),
            Packet::Rrq { .. } | Packet::Wrq { .. } => Step::Ignore,
            Packet::Error { code, msg } => {
                self.state = State::Failed;
                Step::Fail(None, TransferError::Peer { code, msg })
            }
            Packet::Ack(_) => {
                self.state = State::Failed;
                let error = TransferError::Protocol("unexpected ACK on the receiving side".to_string());
                Step::Fail(Some(Packet::error(ErrorCode::IllegalOperation)), error)
            }
        }
    }

    /// The retransmission timer fired
    pub fn on_timeout(&mut self) -> Step {
        if self.state.is_terminal() {
            return Step::Ignore;
        }
        if self.retries >= self.max_retries {
            self.state = State::Failed;
            return Step::Fail(None, TransferError::TimedOut);
        }
        self.retries += 1;
        match &self.last_packet {
            Some(packet) => Step::Resend(packet.clone()),
            None => Step::Ignore,
        }
    }

    fn on_data(&mut self, block_num: u16, data: Vec<u8>) -> Step {
        let expected = self.block_num.wrapping_add(1);
        if block_num != expected {
            // Our ACK was lost and the peer retransmitted; repeat the
            // last ACK without touching the sink
            return match &self.last_packet {
                Some(packet @ Packet::Ack(_)) => Step::Resend(packet.clone()),
                _ => Step::Ignore,
            };
        }

        if let Err(e) = self.sink.write_all(&data) {
            self.state = State::Failed;
            return resource_failure(e);
        }
        self.block_num = block_num;
        self.bytes_received += data.len() as u64;
        self.retries = 0;

        let ack = Packet::Ack(block_num);
        self.last_packet = Some(ack.clone());

        if data.len() < BLOCK_SIZE {
            if let Err(e) = self.sink.flush() {
                self.state = State::Failed;
                return resource_failure(e);
            }
            self.state = State::Done;
            Step::Finish(Some(ack))
        } else {
            Step::Send(ack)
        }
    }
}

/// A transfer of either direction behind one interface, so server
/// workers and the client can share a single driving loop
#[derive(Debug)]
pub enum Transfer<R: Read, W: Write> {
    Sending(Sender<R>),
    Receiving(Receiver<W>),
}

impl<R: Read, W: Write> Transfer<R, W> {
    /// Kick off a dispatcher-created transfer: the first DATA block for
    /// a download, ACK 0 for an upload
    pub fn begin(&mut self) -> Step {
        match self {
            Transfer::Sending(sender) => sender.begin(),
            Transfer::Receiving(receiver) => receiver.begin(),
        }
    }

    pub fn on_packet(&mut self, packet: Packet) -> Step {
        match self {
            Transfer::Sending(sender) => sender.on_packet(packet),
            Transfer::Receiving(receiver) => receiver.on_packet(packet),
        }
    }

    pub fn on_timeout(&mut self) -> Step {
        match self {
            Transfer::Sending(sender) => sender.on_timeout(),
            Transfer::Receiving(receiver) => receiver.on_timeout(),
        }
    }

    pub fn state(&self) -> State {
        match self {
            Transfer::Sending(sender) => sender.state(),
            Transfer::Receiving(receiver) => receiver.state(),
        }
    }

    pub fn retries(&self) -> u32 {
        match self {
            Transfer::Sending(sender) => sender.retries(),
            Transfer::Receiving(receiver) => receiver.retries(),
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        match self {
            Transfer::Sending(sender) => sender.bytes_transferred(),
            Transfer::Receiving(receiver) => receiver.bytes_transferred(),
        }
    }
}
