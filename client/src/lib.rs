//! # Synchronization Client Library
//!
//! This library provides the client side of the tick-synchronization core. A
//! client joins the server, receives its assigned identity, and from then on
//! keeps its local tick and world aligned with the authoritative server while
//! sending its own input commands.
//!
//! ## Core Responsibilities
//!
//! ### Handshake
//! After the transport opens the client sends a join. The welcome carries the
//! assigned identity, the server tick and an initial snapshot. If no welcome
//! arrives in time the client keeps playing under its locally generated
//! identity and reports the fallback.
//!
//! ### Tick Reconciliation
//! Every tick-sync compares the server tick with the local one. Small drift
//! is tolerated, a lagging client jumps forward, a client running ahead is
//! rewound slightly past the server tick, and a major desync re-applies the
//! last snapshot.
//!
//! ### Snapshot Application
//! Snapshots overwrite the local world and cancel any unconfirmed predicted
//! velocity of the player's own entity. Command ids the server reports as
//! processed are cleared from the pending list.
//!
//! ### Liveness
//! Connection attempts and silent connections both time out; heartbeats
//! measure latency while connected.
//!
//! ## Module Organization
//!
//! - `sync`: the client synchronization agent
//! - `game`: locally predicted world
//! - `input`: scripted input with change detection
//! - `network`: WebSocket runtime
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use sync_client::network::{Client, ClientOptions};
//! use sync_shared::SyncConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions {
//!         server_url: "ws://127.0.0.1:8080".to_string(),
//!         player_name: "Player".to_string(),
//!         tick_duration: Duration::from_millis(16),
//!         command_interval: Duration::from_millis(50),
//!         max_reconnects: 3,
//!         run_for: Some(Duration::from_secs(30)),
//!     };
//!
//!     let mut client = Client::new(options, SyncConfig::default());
//!     client.run().await
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod sync;

pub use sync::{
    ClientEvent, ClientTransportEvent, ConnectionState, LocalIdentity, SyncClient, TickAdjustment,
};
