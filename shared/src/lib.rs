//! # Shared Synchronization Types
//!
//! Everything both peers must agree on lives here: the wire protocol, the
//! world snapshot format, the tick source abstraction, and the tuning
//! constants that govern liveness and reconciliation.
//!
//! ## Module Organization
//!
//! ### Protocol (`protocol`, `factory`)
//! The closed set of messages exchanged between client and server, encoded as
//! JSON text frames tagged by a `type` field. Every message type has exactly one
//! constructor so no partially populated message can be built.
//!
//! ### Snapshots (`snapshot`)
//! Immutable point-in-time descriptions of entity component data. Inbound
//! payloads may arrive in the rich per-component form or the older flattened
//! form; both are normalized at the decode boundary.
//!
//! ### Collaborators (`tick`, `world`)
//! The synchronization agents never own the simulation. They consume a
//! [`tick::TickSource`] and hand snapshots and commands to a world trait.
//!
//! ### Transport (`transport`)
//! A cloneable outbound handle per connection. Runtimes adapt whatever socket
//! they use into this ordered, message-oriented channel.
//!
//! ### Physics (`physics`)
//! The platformer body used by the reference worlds on both sides.

pub mod config;
pub mod factory;
pub mod physics;
pub mod protocol;
pub mod snapshot;
pub mod tick;
pub mod transport;
pub mod world;

pub use config::SyncConfig;
pub use protocol::{decode, encode, ErrorCode, InputCommand, Message, ProtocolError, Tick};
pub use snapshot::{ComponentState, EntityId, EntityState, WorldSnapshot};
pub use tick::{TickCounter, TickSource};
pub use transport::{ConnectionHandle, ConnectionId, Outbound, SendError};
pub use world::{ClientWorld, ServerWorld};
