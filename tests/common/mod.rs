//! In-memory link between one server agent and any number of client agents.
//!
//! Frames travel through the same `ConnectionHandle` channels the WebSocket
//! runtimes use; `pump` delivers them until both directions are quiet.

#![allow(dead_code)]

use std::time::Instant;
use sync_client::game::PredictedWorld;
use sync_client::{ClientEvent, ClientTransportEvent, LocalIdentity, SyncClient};
use sync_server::game::GameWorld;
use sync_server::{ServerEvent, SyncServer};
use sync_shared::{ConnectionHandle, ConnectionId, Outbound, ServerWorld, SyncConfig, TickCounter};
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Peer {
    pub client: SyncClient<PredictedWorld, TickCounter>,
    pub events: UnboundedReceiver<ClientEvent>,
    pub connection_id: ConnectionId,
    to_server: Option<UnboundedReceiver<Outbound>>,
    to_client: Option<UnboundedReceiver<Outbound>>,
}

impl Peer {
    pub fn events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub struct Session<W: ServerWorld = GameWorld> {
    pub server: SyncServer<W, TickCounter>,
    pub peers: Vec<Peer>,
    next_connection_id: ConnectionId,
}

impl Session<GameWorld> {
    pub fn new(config: SyncConfig, server_tick: u64) -> Self {
        Self::with_world(config, GameWorld::new(), server_tick)
    }
}

impl<W: ServerWorld> Session<W> {
    pub fn with_world(config: SyncConfig, world: W, server_tick: u64) -> Self {
        Self {
            server: SyncServer::new(config, world, TickCounter::starting_at(server_tick)),
            peers: Vec::new(),
            next_connection_id: 1,
        }
    }

    /// Opens a connection for a new client and returns its index in `peers`.
    pub fn connect(&mut self, player_id: &str, now: Instant) -> usize {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        let (mut client, events) = SyncClient::new(
            self.server.config().clone(),
            PredictedWorld::new(),
            TickCounter::new(),
            LocalIdentity::new(player_id, format!("{} name", player_id)),
        );
        client.connect(now);

        let (server_side, to_client) = ConnectionHandle::channel(connection_id);
        let (client_side, to_server) = ConnectionHandle::channel(connection_id);
        self.server.handle_event(
            ServerEvent::Opened {
                connection: server_side,
            },
            now,
        );
        client.handle_event(ClientTransportEvent::Opened(client_side), now);

        self.peers.push(Peer {
            client,
            events,
            connection_id,
            to_server: Some(to_server),
            to_client: Some(to_client),
        });
        self.peers.len() - 1
    }

    /// Delivers queued frames in both directions until nothing moves.
    pub fn pump(&mut self, now: Instant) {
        loop {
            let mut moved = false;

            for peer in &mut self.peers {
                let connection_id = peer.connection_id;

                let mut upstream = Vec::new();
                if let Some(receiver) = peer.to_server.as_mut() {
                    while let Ok(frame) = receiver.try_recv() {
                        upstream.push(frame);
                    }
                }
                for frame in upstream {
                    moved = true;
                    match frame {
                        Outbound::Text(text) => {
                            self.server.handle_message(connection_id, &text, now)
                        }
                        Outbound::Close => {
                            peer.to_server = None;
                            self.server
                                .handle_event(ServerEvent::Closed { connection_id }, now);
                            break;
                        }
                    }
                }

                let mut downstream = Vec::new();
                if let Some(receiver) = peer.to_client.as_mut() {
                    while let Ok(frame) = receiver.try_recv() {
                        downstream.push(frame);
                    }
                }
                for frame in downstream {
                    moved = true;
                    match frame {
                        Outbound::Text(text) => peer.client.handle_message(&text, now),
                        Outbound::Close => {
                            peer.to_client = None;
                            peer.client.handle_event(ClientTransportEvent::Closed, now);
                            break;
                        }
                    }
                }
            }

            if !moved {
                break;
            }
        }
    }

    /// One server tick: step the counter, run housekeeping, deliver frames.
    pub fn tick(&mut self, now: Instant) -> sync_server::UpdateReport {
        self.server.ticks_mut().step();
        let report = self.server.update(now);
        self.pump(now);
        report
    }
}
