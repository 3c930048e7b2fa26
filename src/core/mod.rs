//! TFTP core protocol implementation
//!
//! This module contains the transport-independent parts of the protocol:
//! - `packet`: Packet serialization and deserialization
//! - `transfer`: Per-transfer state machine
//! - `retry`: Retransmission timing policy
//!
//! Nothing in here owns a socket. The state machine consumes decoded
//! packets and timeout events and answers with [`Step`]s; the server
//! worker and the client carry them out.

mod packet;
mod retry;
mod transfer;

// Public core types
pub use packet::{DecodeError, ErrorCode, Mode, Opcode, Packet, BLOCK_SIZE, MAX_PACKET_SIZE};
pub use retry::{Backoff, RetryPolicy, RetryTimer};
pub use transfer::{Receiver, Sender, State, Step, Transfer, TransferError};
