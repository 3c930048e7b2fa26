//! TFTP server implementation
//!
//! This module provides complete TFTP server functionality:
//! - `server`: Session dispatcher, routes datagrams by peer address
//! - `worker`: Session tasks, one per transfer on its own ephemeral port
//! - `storage`: File access confined to the served directory
//! - `config`: Server configuration
//!
//! The dispatcher owns the well-known port. Each valid read or write
//! request gets a session task that drives the lock-step state machine
//! from [`crate::core`] over its own socket, so the server keeps
//! accepting requests while transfers run.

mod config;
mod server;
mod storage;
mod worker;

// Public server types
pub use config::{Config, DuplicatePolicy, DEFAULT_PORT};
pub use server::{Server, ServerHandle};
pub use storage::{DirStorage, Sink, Source, Storage, StorageError};

/// Run the TFTP server until Ctrl+C or a shutdown through its handle
pub async fn run(config: Config) -> anyhow::Result<()> {
    log::info!("Starting TFTP server on {}", config.listen_addr());
    log::info!("Root directory: {}", config.directory.display());
    log::info!("Read-only mode: {}", config.read_only);

    let server = Server::new(&config).await?;
    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl+C received, shutting down");
            handle.shutdown();
        }
    });

    log::info!("Press Ctrl+C to stop");
    server.run().await
}
