//! TFTP (Trivial File Transfer Protocol) server and client
//!
//! This crate implements the TFTP protocol as specified in
//! [RFC 1350](https://www.rfc-editor.org/rfc/rfc1350) TFTP Protocol version 2:
//! five packet types, 512-byte blocks sent in lock step, one transfer per
//! ephemeral port. Protocol options
//! ([RFC 2347](https://www.rfc-editor.org/rfc/rfc2347)) are not negotiated;
//! requests carrying an option list are still accepted and served with the
//! base protocol.
//!
//! ## Module Structure
//!
//! ```text
//! rtftp/
//! ├── core/           # Protocol core, no I/O
//! │   ├── packet      # Packet serialization/deserialization
//! │   ├── transfer    # Lock-step transfer state machine
//! │   └── retry       # Retransmission policy and timer
//! │
//! ├── server/         # TFTP server
//! │   ├── server      # Session dispatcher
//! │   ├── worker      # Per-transfer session tasks
//! │   ├── storage     # File access confined to one directory
//! │   └── config      # Server configuration
//! │
//! └── client/         # TFTP client
//!     ├── client      # GET and PUT operations
//!     └── config      # Client configuration
//! ```
//!
//! ## Usage Examples
//!
//! ### Start TFTP Server
//!
//! ```rust,no_run
//! use rtftp::server::{Config, Server};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::with_defaults().with_directory(PathBuf::from("/srv/tftp"));
//!     let server = Server::new(&config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ### Download a File
//!
//! ```rust,no_run
//! use rtftp::client::{Client, ClientConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::new("127.0.0.1".parse()?, 20069);
//!     let client = Client::new(config)?;
//!     client.get("firmware.bin", Path::new("firmware.bin")).await
//! }
//! ```

// Submodules
pub mod client;
pub mod core;
pub mod server;

// Re-export commonly used types for convenience
pub use client::{Client, ClientConfig};
pub use server::{Config, Server};
