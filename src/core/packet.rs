use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum DATA payload size in bytes (RFC 1350 block size)
pub const BLOCK_SIZE: usize = 512;

/// Largest well-formed datagram: DATA header plus a full payload
pub const MAX_PACKET_SIZE: usize = 4 + BLOCK_SIZE;

/// Why a received datagram could not be decoded
///
/// An undecodable datagram is dropped by whoever received it; it never
/// produces a protocol ERROR reply on its own, since the sender may not
/// be a peer of any active transfer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram shorter than the fixed header of any packet type
    #[error("datagram too short ({0} bytes)")]
    TooShort(usize),
    /// Opcode outside 1..=5
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    /// A string field ran off the end of the datagram without its NUL
    #[error("unterminated string field")]
    MissingNul,
    /// A string field held invalid UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidString,
    /// ERROR packet carried a code outside 0..=7
    #[error("unknown error code {0}")]
    UnknownErrorCode(u16),
    /// DATA payload longer than the 512 byte block size
    #[error("oversized data payload ({0} bytes)")]
    OversizedData(usize),
    /// Transfer mode string not defined by RFC 1350
    #[error("unknown transfer mode {0:?}")]
    UnknownMode(String),
}

/// TFTP packet opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl TryFrom<u16> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// TFTP error codes as defined by RFC 1350
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    /// Standard message text for this code
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::NotDefined => "Not defined",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "Illegal TFTP operation",
            ErrorCode::UnknownTransferId => "Unknown transfer ID",
            ErrorCode::FileExists => "File already exists",
            ErrorCode::NoSuchUser => "No such user",
        }
    }

    /// Closest protocol code for a local I/O failure
    pub fn from_io(err: &std::io::Error) -> ErrorCode {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => ErrorCode::FileNotFound,
            ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => {
                ErrorCode::AccessViolation
            }
            ErrorKind::StorageFull => ErrorCode::DiskFull,
            ErrorKind::AlreadyExists => ErrorCode::FileExists,
            _ => ErrorCode::NotDefined,
        }
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(ErrorCode::NotDefined),
            1 => Ok(ErrorCode::FileNotFound),
            2 => Ok(ErrorCode::AccessViolation),
            3 => Ok(ErrorCode::DiskFull),
            4 => Ok(ErrorCode::IllegalOperation),
            5 => Ok(ErrorCode::UnknownTransferId),
            6 => Ok(ErrorCode::FileExists),
            7 => Ok(ErrorCode::NoSuchUser),
            other => Err(DecodeError::UnknownErrorCode(other)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u16)
    }
}

/// Transfer modes defined by RFC 1350
///
/// Mode strings on the wire are matched case-insensitively. Transfers
/// carry bytes verbatim in every accepted mode; `netascii` data is never
/// rewritten. `mail` is recognized but always refused at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Netascii,
    Octet,
    Mail,
}

impl Mode {
    /// Canonical lower-case mode string
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Netascii => "netascii",
            Mode::Octet => "octet",
            Mode::Mail => "mail",
        }
    }
}

impl FromStr for Mode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "netascii" => Ok(Mode::Netascii),
            "octet" => Ok(Mode::Octet),
            "mail" => Ok(Mode::Mail),
            _ => Err(DecodeError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single TFTP packet
///
/// The opcode is the first two bytes of every wire packet and determines
/// how the remainder is interpreted. All multi-byte fields are
/// big-endian.
///
/// # Example
///
/// ```rust
/// use rtftp::core::Packet;
///
/// let ack = Packet::Ack(1);
/// assert_eq!(ack.serialize(), vec![0, 4, 0, 1]);
/// assert_eq!(Packet::deserialize(&[0, 4, 0, 1]).unwrap(), ack);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Read request
    Rrq { filename: String, mode: String },
    /// Write request
    Wrq { filename: String, mode: String },
    /// One block of file data
    Data { block_num: u16, data: Vec<u8> },
    /// Acknowledgement of a data block
    Ack(u16),
    /// Terminal error report
    Error { code: ErrorCode, msg: String },
}

impl Packet {
    /// Build an ERROR packet carrying the standard message for `code`
    pub fn error(code: ErrorCode) -> Packet {
        Packet::Error {
            code,
            msg: code.message().to_string(),
        }
    }

    /// Opcode of this packet
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Rrq { .. } => Opcode::Rrq,
            Packet::Wrq { .. } => Opcode::Wrq,
            Packet::Data { .. } => Opcode::Data,
            Packet::Ack(_) => Opcode::Ack,
            Packet::Error { .. } => Opcode::Error,
        }
    }

    /// Encode the packet into a datagram
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Packet::Rrq { filename, mode } => serialize_request(Opcode::Rrq, filename, mode),
            Packet::Wrq { filename, mode } => serialize_request(Opcode::Wrq, filename, mode),
            Packet::Data { block_num, data } => {
                let mut buf = Vec::with_capacity(4 + data.len());
                buf.extend_from_slice(&(Opcode::Data as u16).to_be_bytes());
                buf.extend_from_slice(&block_num.to_be_bytes());
                buf.extend_from_slice(data);
                buf
            }
            Packet::Ack(block_num) => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&(Opcode::Ack as u16).to_be_bytes());
                buf.extend_from_slice(&block_num.to_be_bytes());
                buf
            }
            Packet::Error { code, msg } => {
                let mut buf = Vec::with_capacity(5 + msg.len());
                buf.extend_from_slice(&(Opcode::Error as u16).to_be_bytes());
                buf.extend_from_slice(&(*code as u16).to_be_bytes());
                buf.extend_from_slice(msg.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    /// Decode a received datagram
    ///
    /// Bytes after the last field a packet type defines are ignored, so
    /// requests from RFC 2347 clients that append an option list still
    /// decode. Truncated or otherwise malformed datagrams are rejected.
    pub fn deserialize(buf: &[u8]) -> Result<Packet, DecodeError> {
        if buf.len() < 4 {
            return Err(DecodeError::TooShort(buf.len()));
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let rest = &buf[2..];

        match Opcode::try_from(opcode)? {
            Opcode::Rrq => {
                let (filename, mode) = deserialize_request(rest)?;
                Ok(Packet::Rrq { filename, mode })
            }
            Opcode::Wrq => {
                let (filename, mode) = deserialize_request(rest)?;
                Ok(Packet::Wrq { filename, mode })
            }
            Opcode::Data => {
                let block_num = u16::from_be_bytes([rest[0], rest[1]]);
                let data = rest[2..].to_vec();
                if data.len() > BLOCK_SIZE {
                    return Err(DecodeError::OversizedData(data.len()));
                }
                Ok(Packet::Data { block_num, data })
            }
            Opcode::Ack => Ok(Packet::Ack(u16::from_be_bytes([rest[0], rest[1]]))),
            Opcode::Error => {
                let code = ErrorCode::try_from(u16::from_be_bytes([rest[0], rest[1]]))?;
                let (msg, _) = read_cstr(&rest[2..])?;
                Ok(Packet::Error {
                    code,
                    msg: msg.to_string(),
                })
            }
        }
    }
}

fn serialize_request(opcode: Opcode, filename: &str, mode: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + filename.len() + mode.len());
    buf.extend_from_slice(&(opcode as u16).to_be_bytes());
    buf.extend_from_slice(filename.as_bytes());
    buf.push(0);
    buf.extend_from_slice(mode.as_bytes());
    buf.push(0);
    buf
}

fn deserialize_request(buf: &[u8]) -> Result<(String, String), DecodeError> {
    let (filename, rest) = read_cstr(buf)?;
    let (mode, _) = read_cstr(rest)?;
    Ok((filename.to_string(), mode.to_string()))
}

/// Split one NUL-terminated string off the front of `buf`
fn read_cstr(buf: &[u8]) -> Result<(&str, &[u8]), DecodeError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::MissingNul)?;
    let s = std::str::from_utf8(&buf[..nul]).map_err(|_| DecodeError::InvalidString)?;
    Ok((s, &buf[nul + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format() {
        let rrq = Packet::Rrq {
            filename: "hello.txt".to_string(),
            mode: "octet".to_string(),
        };
        assert_eq!(rrq.serialize(), b"\x00\x01hello.txt\x00octet\x00");

        let wrq = Packet::Wrq {
            filename: "out.bin".to_string(),
            mode: "netascii".to_string(),
        };
        assert_eq!(wrq.serialize(), b"\x00\x02out.bin\x00netascii\x00");
    }

    #[test]
    fn data_wire_format() {
        let data = Packet::Data {
            block_num: 0x0102,
            data: vec![0xaa, 0xbb],
        };
        assert_eq!(data.serialize(), b"\x00\x03\x01\x02\xaa\xbb");

        let empty = Packet::Data {
            block_num: 3,
            data: Vec::new(),
        };
        assert_eq!(empty.serialize(), b"\x00\x03\x00\x03");
        assert_eq!(Packet::deserialize(b"\x00\x03\x00\x03").unwrap(), empty);

        let full = Packet::Data {
            block_num: 1,
            data: vec![0u8; BLOCK_SIZE],
        };
        assert_eq!(full.serialize().len(), MAX_PACKET_SIZE);
    }

    #[test]
    fn error_wire_format() {
        let error = Packet::error(ErrorCode::FileNotFound);
        let bytes = error.serialize();
        assert_eq!(&bytes[..4], b"\x00\x05\x00\x01");
        assert_eq!(bytes.last(), Some(&0));
        assert_eq!(Packet::deserialize(&bytes).unwrap(), error);
    }

    #[test]
    fn request_with_option_tail_decodes() {
        // RFC 2347 clients append option name/value pairs after the mode
        let buf = b"\x00\x01disk.img\x00octet\x00blksize\x001428\x00";
        let packet = Packet::deserialize(buf).unwrap();
        assert_eq!(
            packet,
            Packet::Rrq {
                filename: "disk.img".to_string(),
                mode: "octet".to_string(),
            }
        );
    }

    #[test]
    fn ack_with_trailing_bytes_decodes() {
        let packet = Packet::deserialize(b"\x00\x04\x00\x07junk").unwrap();
        assert_eq!(packet, Packet::Ack(7));
    }

    #[test]
    fn truncated_and_malformed_datagrams_are_rejected() {
        assert_eq!(Packet::deserialize(b""), Err(DecodeError::TooShort(0)));
        assert_eq!(Packet::deserialize(b"\x00\x04\x00"), Err(DecodeError::TooShort(3)));
        assert_eq!(
            Packet::deserialize(b"\x00\x09\x00\x01"),
            Err(DecodeError::UnknownOpcode(9))
        );
        assert_eq!(
            Packet::deserialize(b"\x00\x01no-terminator"),
            Err(DecodeError::MissingNul)
        );
        assert_eq!(
            Packet::deserialize(b"\x00\x01a.txt\x00octet"),
            Err(DecodeError::MissingNul)
        );
        assert_eq!(
            Packet::deserialize(b"\x00\x01\xff\xfe\x00octet\x00"),
            Err(DecodeError::InvalidString)
        );
        assert_eq!(
            Packet::deserialize(b"\x00\x05\x00\x63oops\x00"),
            Err(DecodeError::UnknownErrorCode(99))
        );
    }

    #[test]
    fn oversized_data_is_rejected() {
        let mut buf = vec![0x00, 0x03, 0x00, 0x01];
        buf.extend_from_slice(&[0xab; BLOCK_SIZE + 1]);
        assert_eq!(
            Packet::deserialize(&buf),
            Err(DecodeError::OversizedData(BLOCK_SIZE + 1))
        );
    }

    #[test]
    fn mode_strings_match_case_insensitively() {
        assert_eq!("octet".parse::<Mode>().unwrap(), Mode::Octet);
        assert_eq!("OCTET".parse::<Mode>().unwrap(), Mode::Octet);
        assert_eq!("NetAscii".parse::<Mode>().unwrap(), Mode::Netascii);
        assert_eq!("mail".parse::<Mode>().unwrap(), Mode::Mail);
        assert_eq!(
            "binary".parse::<Mode>(),
            Err(DecodeError::UnknownMode("binary".to_string()))
        );
    }

    #[test]
    fn io_errors_map_to_protocol_codes() {
        use std::io::{Error, ErrorKind};

        let cases = [
            (ErrorKind::NotFound, ErrorCode::FileNotFound),
            (ErrorKind::PermissionDenied, ErrorCode::AccessViolation),
            (ErrorKind::StorageFull, ErrorCode::DiskFull),
            (ErrorKind::AlreadyExists, ErrorCode::FileExists),
            (ErrorKind::BrokenPipe, ErrorCode::NotDefined),
        ];
        for (kind, code) in cases {
            assert_eq!(ErrorCode::from_io(&Error::from(kind)), code);
        }
    }
}
