//! One constructor per message type.
//!
//! Building messages only through these functions guarantees every field the
//! wire shape requires is present, and keeps timestamping in one place.

use crate::protocol::{ErrorCode, InputCommand, Message, SnapshotMessage, Tick, Welcome};
use crate::snapshot::WorldSnapshot;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}

impl Message {
    pub fn join(player_id: impl Into<String>, player_name: impl Into<String>) -> Self {
        Message::Join {
            player_id: player_id.into(),
            player_name: player_name.into(),
        }
    }

    pub fn leave(player_id: impl Into<String>) -> Self {
        Message::Leave {
            player_id: player_id.into(),
        }
    }

    pub fn input_command(command: &InputCommand) -> Self {
        Message::InputCommand {
            player_id: command.player_id.clone(),
            client_tick: command.client_tick,
            command: command.body(),
        }
    }

    /// Handshake reply. `initial_world_state` lets a (re)joining client start
    /// from the current world instead of an empty one.
    pub fn welcome(
        client_id: impl Into<String>,
        assigned_player_id: impl Into<String>,
        server_tick: Tick,
        snapshot_interval: Tick,
        max_players: usize,
        connected_player_ids: Vec<String>,
        initial_world_state: Option<&WorldSnapshot>,
    ) -> Self {
        Message::Welcome(Welcome {
            client_id: client_id.into(),
            assigned_player_id: assigned_player_id.into(),
            server_tick,
            snapshot_interval,
            max_players,
            connected_player_ids,
            initial_world_state: initial_world_state.map(WorldSnapshot::to_payload),
        })
    }

    pub fn world_snapshot(snapshot: &WorldSnapshot, processed_command_ids: Vec<String>) -> Self {
        Message::WorldSnapshot(SnapshotMessage {
            server_tick: snapshot.tick(),
            timestamp: snapshot.timestamp(),
            snapshot: snapshot.to_payload(),
            processed_command_ids,
        })
    }

    pub fn tick_sync(server_tick: Tick) -> Self {
        Message::TickSync {
            server_tick,
            server_time: now_millis(),
        }
    }

    pub fn ping(sequence: u32) -> Self {
        Message::Ping { sequence }
    }

    pub fn pong(sequence: u32) -> Self {
        Message::Pong { sequence }
    }

    pub fn error(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Message::Error {
            error_code,
            message: message.into(),
        }
    }
}
