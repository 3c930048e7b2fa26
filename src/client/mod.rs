//! TFTP client implementation
//!
//! This module provides complete TFTP client functionality:
//! - `client`: GET and PUT transfers against a remote server
//! - `config`: Client configuration

mod client;
mod config;

// Public client types
pub use client::Client;
pub use config::ClientConfig;
