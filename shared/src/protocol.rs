//! Wire protocol shared by client and server.
//!
//! Messages travel as JSON text frames. The `type` field selects the variant
//! and fully determines the payload shape. Decoding never panics: unknown
//! types and malformed payloads come back as [`ProtocolError`] so the caller
//! can log and drop the frame while keeping the connection open.

use crate::snapshot::SnapshotPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Discrete simulation step shared (approximately) by both peers.
pub type Tick = u64;

/// Every `type` discriminator this protocol version understands.
pub const MESSAGE_TYPES: [&str; 9] = [
    "join",
    "leave",
    "input-command",
    "welcome",
    "world-snapshot",
    "tick-sync",
    "ping",
    "pong",
    "error",
];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("message has no `type` field")]
    MissingType,
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    Join { player_id: String, player_name: String },
    #[serde(rename_all = "camelCase")]
    Leave { player_id: String },
    #[serde(rename_all = "camelCase")]
    InputCommand {
        player_id: String,
        client_tick: Tick,
        command: CommandBody,
    },
    Welcome(Welcome),
    WorldSnapshot(SnapshotMessage),
    #[serde(rename_all = "camelCase")]
    TickSync { server_tick: Tick, server_time: u64 },
    Ping { sequence: u32 },
    Pong { sequence: u32 },
    #[serde(rename_all = "camelCase")]
    Error { error_code: ErrorCode, message: String },
}

/// The command part of an `input-command` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBody {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub client_id: String,
    pub assigned_player_id: String,
    pub server_tick: Tick,
    pub snapshot_interval: Tick,
    pub max_players: usize,
    pub connected_player_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_world_state: Option<SnapshotPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMessage {
    pub server_tick: Tick,
    pub timestamp: u64,
    pub snapshot: SnapshotPayload,
    #[serde(default)]
    pub processed_command_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ServerFull,
    IdentityMismatch,
    TickOutOfRange,
    NotJoined,
    AlreadyJoined,
    /// Any code this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join { .. } => "join",
            Message::Leave { .. } => "leave",
            Message::InputCommand { .. } => "input-command",
            Message::Welcome(_) => "welcome",
            Message::WorldSnapshot(_) => "world-snapshot",
            Message::TickSync { .. } => "tick-sync",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Error { .. } => "error",
        }
    }
}

/// A player action travelling from a client to the server's command buffer.
///
/// `id` is unique per command instance; the server applies each id at most
/// once no matter how many times it arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct InputCommand {
    pub id: String,
    pub kind: String,
    pub client_tick: Tick,
    pub player_id: String,
    pub payload: Value,
}

impl InputCommand {
    /// Rebuilds a command from the fields of an `input-command` message.
    pub fn from_wire(player_id: String, client_tick: Tick, body: CommandBody) -> Self {
        Self {
            id: body.id,
            kind: body.kind,
            client_tick,
            player_id,
            payload: body.payload,
        }
    }

    pub fn body(&self) -> CommandBody {
        CommandBody {
            id: self.id.clone(),
            kind: self.kind.clone(),
            payload: self.payload.clone(),
        }
    }
}

pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

    // Check the discriminator first so an unknown type is reported as such
    // instead of as a generic deserialization failure.
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !MESSAGE_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(ProtocolError::Malformed)
}
