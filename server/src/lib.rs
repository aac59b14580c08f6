//! # Synchronization Server Library
//!
//! This library provides the authoritative side of the tick-synchronization
//! core. It owns the single source of truth, decides which clients may join,
//! orders every client's commands by tick, and periodically broadcasts world
//! snapshots so that all clients converge on the same state.
//!
//! ## Core Responsibilities
//!
//! ### Admission Control
//! A join is accepted only while fewer than the configured maximum of players
//! are connected. Accepted clients receive a welcome carrying their assigned
//! identity, the server tick, the snapshot cadence and a full snapshot of the
//! current world so they start synchronized rather than empty.
//!
//! ### Command Validation and Ordering
//! Every input command is checked against the sender's registered identity,
//! the processed-command ledger and a tolerance window around the server tick.
//! Admitted commands are kept sorted by client tick and applied exactly once
//! when the server reaches that tick.
//!
//! ### Liveness
//! Connections that stay silent longer than the timeout threshold are evicted
//! on the next update, as are connections whose transport fails.
//!
//! ## Architecture Design
//!
//! ### Single Owning Task
//! [`sync::SyncServer`] is a plain synchronous state machine. The runtime in
//! [`network`] forwards every transport event over one channel to a single
//! task, which also drives the fixed-rate tick. Handlers run to completion,
//! so the registry, the command buffer and the ledger need no locking.
//!
//! ## Module Organization
//!
//! - `client_manager`: pending and joined connections, identity assignment
//! - `command_buffer`: tick-ordered command queue and bounded dedup ledger
//! - `sync`: the server synchronization agent
//! - `game`: reference authoritative world used by the binary
//! - `network`: WebSocket runtime
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use sync_server::network::Server;
//! use sync_shared::SyncConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(16), // ~60Hz
//!         SyncConfig::default(),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod command_buffer;
pub mod game;
pub mod network;
pub mod sync;

pub use sync::{Rejection, ServerEvent, SyncServer, UpdateReport};
