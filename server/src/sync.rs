//! Server synchronization agent
//!
//! [`SyncServer`] is a synchronous state machine: transport events and the
//! periodic [`SyncServer::update`] are fed to it by exactly one task, and each
//! call runs to completion. It owns the client registry, the tick-ordered
//! command buffer and the dedup ledger, so none of them need a lock.

use crate::client_manager::{AdmissionError, ClientManager};
use crate::command_buffer::{CommandBuffer, ProcessedLedger};
use log::{debug, error, info, warn};
use std::time::Instant;
use sync_shared::protocol::CommandBody;
use sync_shared::{
    decode, encode, ConnectionHandle, ConnectionId, ErrorCode, InputCommand, Message, ServerWorld,
    SyncConfig, Tick, TickSource,
};

/// Transport events delivered to the owning task.
#[derive(Debug)]
pub enum ServerEvent {
    Opened { connection: ConnectionHandle },
    Message { connection_id: ConnectionId, text: String },
    Closed { connection_id: ConnectionId },
    Error { connection_id: ConnectionId, error: String },
}

/// Why an input command was not admitted to the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NotJoined,
    IdentityMismatch { expected: String, received: String },
    /// Already applied or already buffered; dropped silently.
    Duplicate,
    TickOutOfRange { client_tick: Tick, server_tick: Tick },
}

impl Rejection {
    /// Error to report back to the sender, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Rejection::NotJoined => Some(ErrorCode::NotJoined),
            Rejection::IdentityMismatch { .. } => Some(ErrorCode::IdentityMismatch),
            Rejection::Duplicate => None,
            Rejection::TickOutOfRange { .. } => Some(ErrorCode::TickOutOfRange),
        }
    }

    fn describe(&self) -> String {
        match self {
            Rejection::NotJoined => "join before sending commands".to_string(),
            Rejection::IdentityMismatch { expected, received } => format!(
                "command for player {} sent on connection of player {}",
                received, expected
            ),
            Rejection::Duplicate => "duplicate command".to_string(),
            Rejection::TickOutOfRange {
                client_tick,
                server_tick,
            } => format!(
                "client tick {} is outside the accepted window around server tick {}",
                client_tick, server_tick
            ),
        }
    }
}

/// What one [`SyncServer::update`] call did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateReport {
    pub evicted: Vec<ConnectionId>,
    pub applied_commands: usize,
    pub broadcast: bool,
}

pub struct SyncServer<W, T> {
    config: SyncConfig,
    clients: ClientManager,
    commands: CommandBuffer,
    ledger: ProcessedLedger,
    world: W,
    ticks: T,
    last_broadcast_tick: Option<Tick>,
    last_heartbeat: Option<Instant>,
    next_ping_sequence: u32,
}

impl<W: ServerWorld, T: TickSource> SyncServer<W, T> {
    pub fn new(config: SyncConfig, world: W, ticks: T) -> Self {
        Self {
            clients: ClientManager::new(config.max_players),
            commands: CommandBuffer::new(),
            ledger: ProcessedLedger::new(config.ledger_capacity),
            config,
            world,
            ticks,
            last_broadcast_tick: None,
            last_heartbeat: None,
            next_ping_sequence: 1,
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent, now: Instant) {
        match event {
            ServerEvent::Opened { connection } => self.clients.open(connection, now),
            ServerEvent::Message {
                connection_id,
                text,
            } => self.handle_message(connection_id, &text, now),
            ServerEvent::Closed { connection_id } => {
                self.disconnect(connection_id, "connection closed")
            }
            ServerEvent::Error {
                connection_id,
                error,
            } => {
                error!("Transport error on connection {}: {}", connection_id, error);
                self.disconnect(connection_id, "transport error");
            }
        }
    }

    pub fn handle_message(&mut self, connection_id: ConnectionId, text: &str, now: Instant) {
        self.clients.touch(connection_id, now);

        let message = match decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping frame from connection {}: {}", connection_id, e);
                return;
            }
        };

        match message {
            Message::Join {
                player_id,
                player_name,
            } => self.handle_join(connection_id, &player_id, &player_name, now),
            Message::Leave { player_id } => self.handle_leave(connection_id, &player_id),
            Message::InputCommand {
                player_id,
                client_tick,
                command,
            } => self.handle_input(connection_id, player_id, client_tick, command),
            Message::Ping { sequence } => {
                let tick = self.ticks.current_tick();
                self.send_or_disconnect(connection_id, &Message::pong(sequence));
                self.send_or_disconnect(connection_id, &Message::tick_sync(tick));
            }
            Message::Pong { sequence } => {
                if let Some(client) = self.clients.get_mut(connection_id) {
                    if let Some(latency) = client.pong_received(sequence, now) {
                        debug!("Client {} latency {:?}", client.id, latency);
                    }
                }
            }
            other => warn!(
                "Unexpected {} message from connection {}",
                other.kind(),
                connection_id
            ),
        }
    }

    fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        requested_player_id: &str,
        player_name: &str,
        now: Instant,
    ) {
        match self
            .clients
            .admit(connection_id, requested_player_id, player_name, now)
        {
            Ok(admitted) => {
                // Spawn first so the welcome snapshot already contains the player.
                self.world.player_joined(&admitted.player_id, player_name);

                let tick = self.ticks.current_tick();
                let snapshot = self.world.create_snapshot(tick);
                let welcome = Message::welcome(
                    admitted.client_id,
                    admitted.player_id,
                    tick,
                    self.config.snapshot_interval,
                    self.config.max_players,
                    self.clients.player_ids(),
                    snapshot.as_ref(),
                );
                self.send_or_disconnect(connection_id, &welcome);
            }
            Err(AdmissionError::ServerFull) => {
                warn!(
                    "Refusing join from connection {}: server full ({} players)",
                    connection_id,
                    self.clients.len()
                );
                if let Some(departed) = self.clients.remove(connection_id) {
                    let refusal = Message::error(ErrorCode::ServerFull, "server is full");
                    if let Err(e) = departed.handle.send(&refusal) {
                        debug!("Could not deliver refusal to {}: {}", connection_id, e);
                    }
                    departed.handle.close();
                }
            }
            Err(AdmissionError::AlreadyJoined) => {
                self.send_or_disconnect(
                    connection_id,
                    &Message::error(ErrorCode::AlreadyJoined, "connection already joined"),
                );
            }
            Err(AdmissionError::UnknownConnection) => {
                warn!("Join on unknown connection {}", connection_id);
            }
        }
    }

    fn handle_leave(&mut self, connection_id: ConnectionId, player_id: &str) {
        match self.clients.get(connection_id) {
            Some(client) => {
                if client.player_id != player_id {
                    warn!(
                        "Leave for {} received from {}, removing connection anyway",
                        player_id, client.player_id
                    );
                }
                self.disconnect(connection_id, "left");
            }
            None => self.reject(connection_id, &Rejection::NotJoined),
        }
    }

    fn handle_input(
        &mut self,
        connection_id: ConnectionId,
        player_id: String,
        client_tick: Tick,
        body: CommandBody,
    ) {
        let command = InputCommand::from_wire(player_id, client_tick, body);

        match self.validate(connection_id, &command) {
            Ok(()) => {
                debug!(
                    "Buffered command {} for tick {}",
                    command.id, command.client_tick
                );
                self.commands.insert(command);
            }
            Err(Rejection::Duplicate) => {
                debug!("Ignoring retransmitted command {}", command.id);
            }
            Err(rejection) => {
                warn!(
                    "Rejected command {} from connection {}: {:?}",
                    command.id, connection_id, rejection
                );
                self.reject(connection_id, &rejection);
            }
        }
    }

    /// Checks identity, duplicates and the tick window, in that order.
    pub fn validate(
        &self,
        connection_id: ConnectionId,
        command: &InputCommand,
    ) -> Result<(), Rejection> {
        let client = self
            .clients
            .get(connection_id)
            .ok_or(Rejection::NotJoined)?;

        if client.player_id != command.player_id {
            return Err(Rejection::IdentityMismatch {
                expected: client.player_id.clone(),
                received: command.player_id.clone(),
            });
        }

        if self.ledger.contains(&command.id) || self.commands.contains(&command.id) {
            return Err(Rejection::Duplicate);
        }

        let server_tick = self.ticks.current_tick();
        if command.client_tick.abs_diff(server_tick) > self.config.tick_tolerance {
            return Err(Rejection::TickOutOfRange {
                client_tick: command.client_tick,
                server_tick,
            });
        }

        Ok(())
    }

    fn reject(&mut self, connection_id: ConnectionId, rejection: &Rejection) {
        if let Some(code) = rejection.error_code() {
            self.send_or_disconnect(connection_id, &Message::error(code, rejection.describe()));
        }
    }

    /// Per-tick housekeeping: eviction, command draining, broadcast, heartbeat.
    pub fn update(&mut self, now: Instant) -> UpdateReport {
        let evicted = self.evict_stale(now);
        let applied_commands = self.drain_commands();
        let broadcast = self.broadcast_if_due();
        self.heartbeat(now);

        UpdateReport {
            evicted,
            applied_commands,
            broadcast,
        }
    }

    fn evict_stale(&mut self, now: Instant) -> Vec<ConnectionId> {
        let stale = self
            .clients
            .timed_out(now, self.config.timeout_threshold);
        for connection_id in &stale {
            info!("Connection {} timed out", connection_id);
            self.disconnect(*connection_id, "heartbeat timeout");
        }
        stale
    }

    /// Applies every buffered command whose tick has been reached.
    pub fn drain_commands(&mut self) -> usize {
        let current_tick = self.ticks.current_tick();
        let mut applied = 0;

        for command in self.commands.drain_ready(current_tick) {
            if !self.ledger.record(&command.id, command.client_tick) {
                debug!("Command {} already applied", command.id);
                continue;
            }
            self.world.apply_command(&command);
            applied += 1;
        }

        // Anything older than the tick window can no longer pass validation.
        let oldest_accepted = current_tick.saturating_sub(self.config.tick_tolerance);
        let forgotten = self.ledger.evict_before(oldest_accepted);
        if forgotten > 0 {
            debug!("Ledger forgot {} commands older than tick {}", forgotten, oldest_accepted);
        }

        applied
    }

    /// Broadcasts a snapshot once `snapshot_interval` ticks have passed.
    pub fn broadcast_if_due(&mut self) -> bool {
        let tick = self.ticks.current_tick();
        if let Some(last) = self.last_broadcast_tick {
            if tick.saturating_sub(last) < self.config.snapshot_interval {
                return false;
            }
        }

        if self.clients.is_empty() {
            return false;
        }

        let Some(snapshot) = self.world.create_snapshot(tick) else {
            return false;
        };

        let message = Message::world_snapshot(&snapshot, self.ledger.ids());
        let text = match encode(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode snapshot for tick {}: {}", tick, e);
                return false;
            }
        };

        let failed: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter_map(|(connection_id, client)| {
                client
                    .handle
                    .send_text(text.clone())
                    .err()
                    .map(|e| {
                        error!("Failed to send snapshot to {}: {}", client.id, e);
                        *connection_id
                    })
            })
            .collect();

        for connection_id in failed {
            self.disconnect(connection_id, "send failure");
        }

        debug!(
            "Broadcast snapshot for tick {} ({} entities) to {} clients",
            tick,
            snapshot.entity_count(),
            self.clients.len()
        );
        self.last_broadcast_tick = Some(tick);
        true
    }

    fn heartbeat(&mut self, now: Instant) {
        if let Some(last) = self.last_heartbeat {
            if now.saturating_duration_since(last) < self.config.heartbeat_interval {
                return;
            }
        }
        self.last_heartbeat = Some(now);

        let sequence = self.next_ping_sequence;
        self.next_ping_sequence = self.next_ping_sequence.wrapping_add(1);

        let ping = Message::ping(sequence);
        let mut failed = Vec::new();
        for (connection_id, client) in self.clients.iter_mut() {
            match client.handle.send(&ping) {
                Ok(()) => client.ping_sent(sequence, now),
                Err(e) => {
                    error!("Failed to ping {}: {}", client.id, e);
                    failed.push(*connection_id);
                }
            }
        }

        for connection_id in failed {
            self.disconnect(connection_id, "send failure");
        }
    }

    fn send_or_disconnect(&mut self, connection_id: ConnectionId, message: &Message) {
        let Some(handle) = self.clients.handle(connection_id) else {
            return;
        };

        if let Err(e) = handle.send(message) {
            error!(
                "Failed to send {} to connection {}: {}",
                message.kind(),
                connection_id,
                e
            );
            self.disconnect(connection_id, "send failure");
        }
    }

    /// Removes a connection, closes its transport and despawns its player.
    pub fn disconnect(&mut self, connection_id: ConnectionId, reason: &str) {
        if let Some(departed) = self.clients.remove(connection_id) {
            departed.handle.close();
            if let Some(player_id) = departed.player_id {
                info!("Player {} disconnected: {}", player_id, reason);
                self.world.player_left(&player_id);
            }
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn buffered_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn ledger(&self) -> &ProcessedLedger {
        &self.ledger
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn ticks(&self) -> &T {
        &self.ticks
    }

    pub fn ticks_mut(&mut self) -> &mut T {
        &mut self.ticks
    }
}
