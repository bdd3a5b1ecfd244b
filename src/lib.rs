//! File Syncer
//!
//! One-shot mirroring of a flat directory of files from a "main" host to a
//! "replica" host over a single authenticated TCP connection. Only files
//! whose content hash differs are transferred; files the main side never
//! mentions are pruned on the replica.

pub mod config;
pub mod connection;
pub mod index;
pub mod message;
pub mod sync;

pub use config::{Config, ConfigError};
pub use connection::{connect, establish, Acceptor, ConnectError, Connection, WireError};
pub use index::{FileIndex, IndexEntry, IndexError};
pub use message::{Message, MessageError};
pub use sync::{SyncError, SyncReport, Syncer};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
