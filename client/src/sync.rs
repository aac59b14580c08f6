//! Client synchronization agent
//!
//! [`SyncClient`] owns the single connection to the server and keeps the local
//! world consistent with it. It is driven entirely from outside: the runtime
//! feeds transport events into [`SyncClient::handle_event`] and calls
//! [`SyncClient::update`] once per local tick. All liveness checks are
//! wall-clock comparisons made inside `update`, and every outcome the caller
//! may care about is published as a [`ClientEvent`].

use log::{debug, error, info, warn};
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use sync_shared::factory::now_millis;
use sync_shared::protocol::{SnapshotMessage, Welcome};
use sync_shared::{
    decode, ClientWorld, ConnectionHandle, ErrorCode, InputCommand, Message, SendError,
    SyncConfig, Tick, TickSource, WorldSnapshot,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Transport events delivered by the runtime.
#[derive(Debug)]
pub enum ClientTransportEvent {
    Opened(ConnectionHandle),
    Message(String),
    Closed,
    Error(String),
}

/// Notifications surfaced to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Welcomed { client_id: String, player_id: String },
    /// No welcome arrived in time; the local identity is used instead.
    IdentityFallback { player_id: String },
    SnapshotApplied { tick: Tick, entity_count: usize },
    CommandsAcknowledged(Vec<String>),
    ServerError { code: ErrorCode, message: String },
    ConnectionFailed(String),
    Disconnected(String),
}

/// Outcome of one tick-sync reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAdjustment {
    None,
    Advanced { from: Tick, to: Tick },
    Rewound { from: Tick, to: Tick },
}

/// Identity the client uses until (and unless) the server assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    pub player_id: String,
    pub player_name: String,
}

impl LocalIdentity {
    pub fn new(player_id: impl Into<String>, player_name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            player_name: player_name.into(),
        }
    }

    /// Random `player-xxxxxxxx` id.
    pub fn generate(player_name: impl Into<String>) -> Self {
        let suffix: u32 = rand::thread_rng().gen();
        Self::new(format!("player-{:08x}", suffix), player_name)
    }
}

pub struct SyncClient<W, T> {
    config: SyncConfig,
    world: W,
    ticks: T,
    identity: LocalIdentity,

    state: ConnectionState,
    transport: Option<ConnectionHandle>,
    client_id: Option<String>,
    player_id: String,
    welcomed: bool,
    using_fallback: bool,
    attempted: bool,
    reconnect_attempts: u32,

    connect_started: Option<Instant>,
    opened_at: Option<Instant>,
    last_message_time: Option<Instant>,
    last_heartbeat: Option<Instant>,
    outstanding_ping: Option<(u32, Instant)>,
    next_ping_sequence: u32,
    measured_latency: Option<Duration>,

    snapshot_interval: Tick,
    last_snapshot: Option<WorldSnapshot>,
    pending_commands: Vec<InputCommand>,
    next_command_sequence: u64,

    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<W: ClientWorld, T: TickSource> SyncClient<W, T> {
    pub fn new(
        config: SyncConfig,
        world: W,
        ticks: T,
        identity: LocalIdentity,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let client = Self {
            snapshot_interval: config.snapshot_interval,
            config,
            world,
            ticks,
            player_id: identity.player_id.clone(),
            identity,
            state: ConnectionState::Disconnected,
            transport: None,
            client_id: None,
            welcomed: false,
            using_fallback: false,
            attempted: false,
            reconnect_attempts: 0,
            connect_started: None,
            opened_at: None,
            last_message_time: None,
            last_heartbeat: None,
            outstanding_ping: None,
            next_ping_sequence: 1,
            measured_latency: None,
            last_snapshot: None,
            pending_commands: Vec::new(),
            next_command_sequence: 1,
            events,
        };
        (client, receiver)
    }

    /// Starts a connection attempt. The runtime opens the transport and
    /// reports back through [`ClientTransportEvent::Opened`].
    pub fn connect(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Disconnected {
            warn!("connect called while {:?}", self.state);
            return false;
        }

        if self.attempted {
            self.reconnect_attempts += 1;
        }
        self.attempted = true;
        self.state = ConnectionState::Connecting;
        self.connect_started = Some(now);
        info!(
            "Connecting as {} (attempt {})",
            self.player_id,
            self.reconnect_attempts + 1
        );
        true
    }

    /// Explicit leave: tells the server, closes the transport.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            if let Some(transport) = &self.transport {
                if let Err(e) = transport.send(&Message::leave(self.player_id.clone())) {
                    debug!("Could not send leave: {}", e);
                }
            }
        }
        self.force_disconnect("client left");
    }

    pub fn handle_event(&mut self, event: ClientTransportEvent, now: Instant) {
        match event {
            ClientTransportEvent::Opened(handle) => self.handle_open(handle, now),
            ClientTransportEvent::Message(text) => self.handle_message(&text, now),
            ClientTransportEvent::Closed => self.force_disconnect("connection closed"),
            ClientTransportEvent::Error(e) => {
                error!("Transport error: {}", e);
                if self.state == ConnectionState::Connecting {
                    self.fail_connection(format!("transport error: {}", e));
                } else {
                    self.force_disconnect(&format!("transport error: {}", e));
                }
            }
        }
    }

    fn handle_open(&mut self, handle: ConnectionHandle, now: Instant) {
        if self.state != ConnectionState::Connecting {
            // The attempt was abandoned (timeout or leave) before the socket opened.
            handle.close();
            return;
        }

        self.state = ConnectionState::Connected;
        self.connect_started = None;
        self.opened_at = Some(now);
        self.last_message_time = Some(now);
        self.last_heartbeat = Some(now);

        let join = Message::join(self.player_id.clone(), self.identity.player_name.clone());
        let sent = handle.send(&join);
        self.transport = Some(handle);
        info!("Connection open, joining as {}", self.player_id);
        self.emit(ClientEvent::Connected);

        if let Err(e) = sent {
            error!("Failed to send join: {}", e);
            self.force_disconnect("send failure");
        }
    }

    pub fn handle_message(&mut self, text: &str, now: Instant) {
        if self.state != ConnectionState::Connected {
            return;
        }
        self.last_message_time = Some(now);

        let message = match decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping frame from server: {}", e);
                return;
            }
        };

        match message {
            Message::Welcome(welcome) => self.handle_welcome(welcome),
            Message::WorldSnapshot(snapshot) => self.handle_snapshot(snapshot),
            Message::TickSync { server_tick, .. } => {
                self.handle_tick_sync(server_tick, now);
            }
            Message::Ping { sequence } => self.send(&Message::pong(sequence)),
            Message::Pong { sequence } => debug!("Pong {}", sequence),
            Message::Error {
                error_code,
                message,
            } => {
                warn!("Server error {:?}: {}", error_code, message);
                self.emit(ClientEvent::ServerError {
                    code: error_code,
                    message,
                });
            }
            other => warn!("Unexpected {} message from server", other.kind()),
        }
    }

    fn handle_welcome(&mut self, welcome: Welcome) {
        if self.using_fallback && welcome.assigned_player_id != self.player_id {
            warn!(
                "Late welcome assigns {} after falling back to {}; earlier commands may be rejected",
                welcome.assigned_player_id, self.player_id
            );
        }

        self.client_id = Some(welcome.client_id.clone());
        self.player_id = welcome.assigned_player_id.clone();
        self.welcomed = true;
        self.using_fallback = false;
        self.reconnect_attempts = 0;
        self.snapshot_interval = welcome.snapshot_interval;
        self.ticks.sync_with_server(welcome.server_tick);

        info!(
            "Welcomed as {} ({}) at tick {}, {} players connected",
            self.player_id,
            welcome.client_id,
            welcome.server_tick,
            welcome.connected_player_ids.len()
        );
        self.emit(ClientEvent::Welcomed {
            client_id: welcome.client_id,
            player_id: self.player_id.clone(),
        });

        if let Some(initial) = &welcome.initial_world_state {
            let snapshot = WorldSnapshot::from_payload(welcome.server_tick, now_millis(), initial);
            self.apply_full_snapshot(snapshot);
        }
    }

    fn handle_snapshot(&mut self, message: SnapshotMessage) {
        let snapshot =
            WorldSnapshot::from_payload(message.server_tick, message.timestamp, &message.snapshot);
        self.apply_full_snapshot(snapshot);
        self.acknowledge(&message.processed_command_ids);
    }

    fn apply_full_snapshot(&mut self, snapshot: WorldSnapshot) {
        self.world.apply_snapshot(&snapshot);
        // Unconfirmed predicted motion would fight the correction.
        self.world.reset_predicted_velocity(&self.player_id);

        self.emit(ClientEvent::SnapshotApplied {
            tick: snapshot.tick(),
            entity_count: snapshot.entity_count(),
        });
        self.last_snapshot = Some(snapshot);
    }

    fn acknowledge(&mut self, processed: &[String]) {
        let processed: HashSet<&str> = processed.iter().map(String::as_str).collect();
        let mut acknowledged = Vec::new();
        self.pending_commands.retain(|command| {
            if processed.contains(command.id.as_str()) {
                acknowledged.push(command.id.clone());
                false
            } else {
                true
            }
        });

        // Commands the server rejected are never acknowledged; forget them
        // once they fall outside the server's tick window.
        let horizon = self
            .ticks
            .current_tick()
            .saturating_sub(self.config.tick_tolerance);
        self.pending_commands
            .retain(|command| command.client_tick >= horizon);

        if !acknowledged.is_empty() {
            self.emit(ClientEvent::CommandsAcknowledged(acknowledged));
        }
    }

    fn handle_tick_sync(&mut self, server_tick: Tick, now: Instant) -> TickAdjustment {
        if let Some((sequence, sent_at)) = self.outstanding_ping.take() {
            let latency = now.saturating_duration_since(sent_at) / 2;
            debug!("Ping {} latency {:?}", sequence, latency);
            self.measured_latency = Some(latency);
        }
        self.reconcile_tick(server_tick)
    }

    /// Corrects local tick drift against the server tick.
    ///
    /// Small drift is ignored. A client that fell behind jumps to the server
    /// tick; one that ran ahead is rewound to `rewind_margin` ticks before it.
    /// Beyond the major desync threshold the last snapshot is re-applied.
    pub fn reconcile_tick(&mut self, server_tick: Tick) -> TickAdjustment {
        let local_tick = self.ticks.current_tick();
        let diff = server_tick as i64 - local_tick as i64;
        let tolerance = self.config.tick_drift_tolerance as i64;

        let adjustment = if diff > tolerance {
            self.ticks.advance_to_tick(server_tick);
            TickAdjustment::Advanced {
                from: local_tick,
                to: server_tick,
            }
        } else if diff < -tolerance {
            let target = server_tick.saturating_sub(self.config.rewind_margin);
            self.ticks.rewind_to_tick(target);
            TickAdjustment::Rewound {
                from: local_tick,
                to: target,
            }
        } else {
            TickAdjustment::None
        };

        if diff.unsigned_abs() > self.config.major_desync_threshold {
            if let Some(snapshot) = self.last_snapshot.take() {
                warn!(
                    "Major desync ({} ticks), re-applying snapshot {}",
                    diff,
                    snapshot.tick()
                );
                self.apply_full_snapshot(snapshot);
            }
        }

        if adjustment != TickAdjustment::None {
            debug!("Tick reconciliation: {:?}", adjustment);
        }
        adjustment
    }

    /// Liveness and handshake timers. Call once per local tick.
    pub fn update(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => {
                let started = self.connect_started.unwrap_or(now);
                if now.saturating_duration_since(started) > self.config.connection_timeout {
                    self.fail_connection("connection attempt timed out".to_string());
                }
            }
            ConnectionState::Connected => {
                let last_message = self.last_message_time.unwrap_or(now);
                if now.saturating_duration_since(last_message) > self.config.timeout_threshold {
                    warn!("No message from server for {:?}", now - last_message);
                    self.force_disconnect("heartbeat timeout");
                    return;
                }

                if !self.welcomed && !self.using_fallback {
                    let opened = self.opened_at.unwrap_or(now);
                    if now.saturating_duration_since(opened) > self.config.welcome_timeout {
                        self.fall_back_to_local_identity();
                    }
                }

                let due = self.last_heartbeat.map_or(true, |last| {
                    now.saturating_duration_since(last) >= self.config.heartbeat_interval
                });
                if due {
                    let sequence = self.next_ping_sequence;
                    self.next_ping_sequence = self.next_ping_sequence.wrapping_add(1);
                    self.last_heartbeat = Some(now);
                    self.outstanding_ping = Some((sequence, now));
                    self.send(&Message::ping(sequence));
                }
            }
        }
    }

    fn fall_back_to_local_identity(&mut self) {
        self.using_fallback = true;
        self.player_id = self.identity.player_id.clone();
        self.client_id = Some(self.identity.player_id.clone());
        warn!(
            "No welcome within {:?}, continuing as {}",
            self.config.welcome_timeout, self.player_id
        );
        self.emit(ClientEvent::IdentityFallback {
            player_id: self.player_id.clone(),
        });
    }

    /// Sends one input command stamped with the local tick and player id.
    ///
    /// Returns the generated command id so the caller can match acknowledgments.
    pub fn send_command(&mut self, kind: &str, payload: Value) -> Result<String, SendError> {
        let id = format!("{}-{}", self.player_id, self.next_command_sequence);
        self.send_command_with_id(id, kind, payload)
    }

    /// Like [`send_command`](Self::send_command) with a caller-chosen id.
    pub fn send_command_with_id(
        &mut self,
        id: String,
        kind: &str,
        payload: Value,
    ) -> Result<String, SendError> {
        if self.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let Some(transport) = self.transport.as_ref() else {
            return Err(SendError::NotConnected);
        };

        let command = InputCommand {
            id,
            kind: kind.to_string(),
            client_tick: self.ticks.current_tick(),
            player_id: self.player_id.clone(),
            payload,
        };

        match transport.send(&Message::input_command(&command)) {
            Ok(()) => {
                self.next_command_sequence += 1;
                let id = command.id.clone();
                self.pending_commands.push(command);
                Ok(id)
            }
            Err(e) => {
                error!("Failed to send command {}: {}", command.id, e);
                if matches!(e, SendError::Closed) {
                    self.force_disconnect("send failure");
                }
                Err(e)
            }
        }
    }

    fn send(&mut self, message: &Message) {
        let Some(transport) = &self.transport else {
            return;
        };
        if let Err(e) = transport.send(message) {
            error!("Failed to send {}: {}", message.kind(), e);
            self.force_disconnect("send failure");
        }
    }

    fn fail_connection(&mut self, reason: String) {
        warn!("Connection attempt failed: {}", reason);
        self.state = ConnectionState::Disconnected;
        self.connect_started = None;
        self.emit(ClientEvent::ConnectionFailed(reason));
    }

    fn force_disconnect(&mut self, reason: &str) {
        match self.state {
            ConnectionState::Disconnected => return,
            ConnectionState::Connecting => {
                self.fail_connection(reason.to_string());
                return;
            }
            ConnectionState::Connected => {}
        }

        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.state = ConnectionState::Disconnected;
        self.welcomed = false;
        self.using_fallback = false;
        self.opened_at = None;
        self.outstanding_ping = None;
        self.last_heartbeat = None;

        info!("Disconnected: {}", reason);
        self.emit(ClientEvent::Disconnected(reason.to_string()));
    }

    fn emit(&self, event: ClientEvent) {
        // The caller may have stopped listening; that is not our problem.
        let _ = self.events.send(event);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn is_welcomed(&self) -> bool {
        self.welcomed
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn measured_latency(&self) -> Option<Duration> {
        self.measured_latency
    }

    pub fn last_message_time(&self) -> Option<Instant> {
        self.last_message_time
    }

    pub fn snapshot_interval(&self) -> Tick {
        self.snapshot_interval
    }

    pub fn last_snapshot(&self) -> Option<&WorldSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn pending_commands(&self) -> &[InputCommand] {
        &self.pending_commands
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
