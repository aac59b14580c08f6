use crate::game::PredictedWorld;
use crate::input::InputManager;
use crate::sync::{ClientEvent, ClientTransportEvent, ConnectionState, LocalIdentity, SyncClient};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};
use sync_shared::physics::MOVE_COMMAND;
use sync_shared::{ConnectionHandle, Outbound, SyncConfig, TickCounter, TickSource};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as Frame;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Transport events tagged with the connection attempt that produced them, so
/// a socket closing late cannot tear down its successor.
type TaggedEvent = (u64, ClientTransportEvent);

pub struct ClientOptions {
    pub server_url: String,
    pub player_name: String,
    pub tick_duration: Duration,
    pub command_interval: Duration,
    pub max_reconnects: u32,
    pub run_for: Option<Duration>,
}

pub struct Client {
    options: ClientOptions,
    sync: SyncClient<PredictedWorld, TickCounter>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    input_manager: InputManager,

    generation: u64,
    reconnect_at: Option<Instant>,
    transport_tx: mpsc::UnboundedSender<TaggedEvent>,
    transport_rx: mpsc::UnboundedReceiver<TaggedEvent>,
}

impl Client {
    pub fn new(options: ClientOptions, config: SyncConfig) -> Self {
        let identity = LocalIdentity::generate(options.player_name.clone());
        let (sync, events) =
            SyncClient::new(config, PredictedWorld::new(), TickCounter::new(), identity);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        Client {
            input_manager: InputManager::new(options.command_interval * 10),
            options,
            sync,
            events,
            generation: 0,
            reconnect_at: None,
            transport_tx,
            transport_rx,
        }
    }

    fn connect(&mut self, now: Instant) {
        if !self.sync.connect(now) {
            return;
        }
        self.generation += 1;
        info!("Connecting to {}...", self.options.server_url);
        tokio::spawn(run_connection(
            self.options.server_url.clone(),
            self.generation,
            self.transport_tx.clone(),
        ));
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let started = Instant::now();
        self.connect(started);

        let mut tick_interval = interval(self.options.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut command_interval = interval(self.options.command_interval);
        command_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = started;

        loop {
            tokio::select! {
                Some((generation, event)) = self.transport_rx.recv() => {
                    if generation != self.generation {
                        debug!("Ignoring event from stale connection {}", generation);
                        continue;
                    }
                    self.sync.handle_event(event, Instant::now());
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.sync.ticks_mut().step();
                    self.sync.world_mut().step(dt);
                    self.sync.update(now);

                    if self.reconnect_at.is_some_and(|at| now >= at)
                        && self.sync.state() == ConnectionState::Disconnected
                    {
                        self.reconnect_at = None;
                        self.connect(now);
                    }

                    if self
                        .options
                        .run_for
                        .is_some_and(|run_for| now.duration_since(started) >= run_for)
                    {
                        info!("Run time elapsed");
                        break;
                    }
                },

                _ = command_interval.tick() => {
                    if self.sync.is_connected() {
                        self.send_input()?;
                    }
                },
            }

            if !self.drain_events() {
                break;
            }
        }

        self.sync.disconnect();
        // Let the writer flush the leave message before the runtime exits.
        sleep(Duration::from_millis(100)).await;

        let world = self.sync.world();
        info!(
            "Finished at tick {}: {} entities, {} corrections, latency {:?}",
            self.sync.ticks().current_tick(),
            world.entity_count(),
            world.corrections(),
            self.sync.measured_latency()
        );
        Ok(())
    }

    fn send_input(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(input) = self.input_manager.update(Instant::now()) else {
            return Ok(());
        };

        let player_id = self.sync.player_id().to_string();
        self.sync.world_mut().predict(&player_id, &input);

        let payload = serde_json::to_value(input)?;
        if let Err(e) = self.sync.send_command(MOVE_COMMAND, payload) {
            warn!("Failed to send input: {}", e);
        }
        Ok(())
    }

    /// Returns `false` once the client should stop.
    fn drain_events(&mut self) -> bool {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ClientEvent::Welcomed {
                    client_id,
                    player_id,
                } => info!("Joined as {} ({})", player_id, client_id),
                ClientEvent::IdentityFallback { player_id } => {
                    warn!("Playing as {} without a welcome", player_id)
                }
                ClientEvent::SnapshotApplied { tick, entity_count } => {
                    debug!("Snapshot {} with {} entities", tick, entity_count)
                }
                ClientEvent::CommandsAcknowledged(ids) => {
                    debug!("{} commands acknowledged", ids.len())
                }
                ClientEvent::ServerError { code, message } => {
                    error!("Server error {:?}: {}", code, message)
                }
                ClientEvent::Connected => {}
                ClientEvent::ConnectionFailed(reason) => {
                    if self.sync.reconnect_attempts() >= self.options.max_reconnects {
                        error!(
                            "Giving up after {} reconnects: {}",
                            self.options.max_reconnects, reason
                        );
                        return false;
                    }
                    info!("Connection failed ({}), retrying in {:?}", reason, RECONNECT_DELAY);
                    self.reconnect_at = Some(Instant::now() + RECONNECT_DELAY);
                }
                ClientEvent::Disconnected(reason) => {
                    // A dropped session is final; only failed attempts are retried.
                    warn!("Disconnected: {}", reason);
                    return false;
                }
            }
        }
        true
    }
}

/// Opens one WebSocket and pumps frames between it and the run loop.
async fn run_connection(url: String, generation: u64, events: mpsc::UnboundedSender<TaggedEvent>) {
    let socket = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            let _ = events.send((generation, ClientTransportEvent::Error(e.to_string())));
            return;
        }
    };

    let (mut write, mut read) = socket.split();
    let (handle, mut outbound_rx) = ConnectionHandle::channel(generation);
    if events
        .send((generation, ClientTransportEvent::Opened(handle)))
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if let Err(e) = write.send(Frame::Text(text)).await {
                        debug!("Write failed: {}", e);
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = write.close().await;
                    break;
                }
            }
        }
    });

    let closing = loop {
        match read.next().await {
            Some(Ok(Frame::Text(text))) => {
                if events
                    .send((generation, ClientTransportEvent::Message(text)))
                    .is_err()
                {
                    break None;
                }
            }
            Some(Ok(Frame::Close(_))) | None => break Some(ClientTransportEvent::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(ClientTransportEvent::Error(e.to_string())),
        }
    };

    if let Some(event) = closing {
        let _ = events.send((generation, event));
    }
    writer.abort();
}
