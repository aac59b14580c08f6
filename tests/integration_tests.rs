//! Integration tests for the synchronization agents
//!
//! Server and clients talk through in-memory connection channels, so every
//! message crosses the real wire encoding without opening sockets.

mod common;

use assert_approx_eq::assert_approx_eq;
use common::Session;
use serde_json::json;
use std::time::{Duration, Instant};
use sync_client::{ClientEvent, ConnectionState};
use sync_shared::physics::{MOVE_COMMAND, PLAYER_SPEED};
use sync_shared::{decode, encode, ErrorCode, InputCommand, Message, SyncConfig, TickSource};

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    #[test]
    fn join_delivers_identity_tick_and_world() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 50);
        let alice = session.connect("alice", now);
        session.pump(now);

        let peer = &mut session.peers[alice];
        assert!(peer.client.is_welcomed());
        assert_eq!(peer.client.player_id(), "alice");
        assert_eq!(peer.client.client_id(), Some("client-1"));
        assert_eq!(peer.client.ticks().current_tick(), 50);

        // The welcome snapshot already contains the joining player.
        assert!(peer.client.world().body_of("alice").is_some());

        let events = peer.events();
        assert_eq!(events[0], ClientEvent::Connected);
        assert!(events.contains(&ClientEvent::Welcomed {
            client_id: "client-1".to_string(),
            player_id: "alice".to_string(),
        }));
        assert_eq!(session.server.clients().len(), 1);
    }

    #[test]
    fn second_player_sees_first_in_welcome() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        session.connect("alice", now);
        let bob = session.connect("bob", now);
        session.pump(now);

        let world = session.peers[bob].client.world();
        assert_eq!(world.entity_count(), 2);
        assert!(world.body_of("alice").is_some());
    }

    #[test]
    fn full_server_refuses_and_closes() {
        let now = Instant::now();
        let config = SyncConfig {
            max_players: 1,
            ..SyncConfig::default()
        };
        let mut session = Session::new(config, 0);
        session.connect("alice", now);
        let bob = session.connect("bob", now);
        session.pump(now);

        assert_eq!(session.server.clients().len(), 1);

        let peer = &mut session.peers[bob];
        assert_eq!(peer.client.state(), ConnectionState::Disconnected);
        let events = peer.events();
        assert!(events.iter().any(|event| matches!(
            event,
            ClientEvent::ServerError {
                code: ErrorCode::ServerFull,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|event| matches!(event, ClientEvent::Disconnected(_))));
    }

    #[test]
    fn leave_despawns_player() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        let alice = session.connect("alice", now);
        session.pump(now);
        assert_eq!(session.server.world().player_count(), 1);

        session.peers[alice].client.disconnect();
        session.pump(now);

        assert!(session.server.clients().is_empty());
        assert_eq!(session.server.world().player_count(), 0);
    }
}

/// COMMAND PIPELINE TESTS
mod command_tests {
    use super::*;

    #[test]
    fn command_is_applied_once_and_acknowledged() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 10);
        let alice = session.connect("alice", now);
        session.pump(now);

        let command_id = session.peers[alice]
            .client
            .send_command(MOVE_COMMAND, json!({"right": true}))
            .unwrap();
        session.pump(now);
        assert_eq!(session.server.buffered_commands(), 1);

        // Retransmission of the same command is dropped silently.
        let retransmit = Message::input_command(&session.peers[alice].client.pending_commands()[0]);
        let connection_id = session.peers[alice].connection_id;
        session
            .server
            .handle_message(connection_id, &encode(&retransmit).unwrap(), now);
        assert_eq!(session.server.buffered_commands(), 1);

        let report = session.tick(now);
        assert_eq!(report.applied_commands, 1);
        assert!(report.broadcast);
        assert_eq!(session.server.world().applied_commands(), 1);
        assert_approx_eq!(
            session.server.world().body_of("alice").unwrap().vel_x,
            PLAYER_SPEED,
            0.001
        );

        // Sent again after it was applied: still ignored.
        session
            .server
            .handle_message(connection_id, &encode(&retransmit).unwrap(), now);
        assert_eq!(session.server.buffered_commands(), 0);

        let peer = &mut session.peers[alice];
        assert!(peer.client.pending_commands().is_empty());
        assert!(peer
            .events()
            .contains(&ClientEvent::CommandsAcknowledged(vec![command_id])));
    }

    #[test]
    fn commands_wait_for_their_tick() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 10);
        let alice = session.connect("alice", now);
        session.pump(now);

        // Client runs a few ticks ahead of the server.
        for _ in 0..3 {
            session.peers[alice].client.ticks_mut().step();
        }
        session.peers[alice]
            .client
            .send_command(MOVE_COMMAND, json!({"left": true}))
            .unwrap();
        session.pump(now);

        assert_eq!(session.tick(now).applied_commands, 0);
        assert_eq!(session.tick(now).applied_commands, 0);
        assert_eq!(session.tick(now).applied_commands, 1);
    }

    #[test]
    fn foreign_player_id_is_rejected() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 10);
        let alice = session.connect("alice", now);
        session.pump(now);

        let forged = InputCommand {
            id: "bob-1".to_string(),
            kind: MOVE_COMMAND.to_string(),
            client_tick: 10,
            player_id: "bob".to_string(),
            payload: json!({"left": true}),
        };
        let connection_id = session.peers[alice].connection_id;
        session.server.handle_message(
            connection_id,
            &encode(&Message::input_command(&forged)).unwrap(),
            now,
        );
        session.pump(now);

        assert_eq!(session.server.buffered_commands(), 0);
        assert!(session.peers[alice].events().iter().any(|event| matches!(
            event,
            ClientEvent::ServerError {
                code: ErrorCode::IdentityMismatch,
                ..
            }
        )));
    }

    #[test]
    fn stale_tick_is_rejected() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 500);
        let alice = session.connect("alice", now);
        session.pump(now);

        session.peers[alice].client.ticks_mut().sync_with_server(100);
        session.peers[alice]
            .client
            .send_command(MOVE_COMMAND, json!({}))
            .unwrap();
        session.pump(now);

        assert_eq!(session.server.buffered_commands(), 0);
        assert!(session.peers[alice].events().iter().any(|event| matches!(
            event,
            ClientEvent::ServerError {
                code: ErrorCode::TickOutOfRange,
                ..
            }
        )));
    }
}

/// TICK SYNCHRONIZATION TESTS
mod tick_sync_tests {
    use super::*;

    #[test]
    fn heartbeat_pulls_lagging_client_forward() {
        let start = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        let alice = session.connect("alice", start);
        session.pump(start);

        for _ in 0..30 {
            session.server.ticks_mut().step();
        }

        let later = start + Duration::from_secs(1);
        session.peers[alice].client.update(later);
        session.pump(later);

        let client = &session.peers[alice].client;
        assert_eq!(client.ticks().current_tick(), 30);
        assert_eq!(client.measured_latency(), Some(Duration::ZERO));
    }

    #[test]
    fn small_drift_is_left_alone() {
        let start = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        let alice = session.connect("alice", start);
        session.pump(start);

        for _ in 0..3 {
            session.server.ticks_mut().step();
        }

        let later = start + Duration::from_secs(1);
        session.peers[alice].client.update(later);
        session.pump(later);

        assert_eq!(session.peers[alice].client.ticks().current_tick(), 0);
    }

    #[test]
    fn snapshots_follow_the_interval() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        let alice = session.connect("alice", now);
        session.pump(now);
        session.peers[alice].events();

        let broadcasts: Vec<bool> = (0..7).map(|_| session.tick(now).broadcast).collect();
        assert_eq!(
            broadcasts,
            vec![true, false, false, true, false, false, true]
        );

        let applied = session.peers[alice]
            .events()
            .into_iter()
            .filter(|event| matches!(event, ClientEvent::SnapshotApplied { .. }))
            .count();
        assert_eq!(applied, 3);
    }
}

/// LIVENESS TESTS
mod liveness_tests {
    use super::*;

    #[test]
    fn silent_client_is_evicted() {
        let start = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        let alice = session.connect("alice", start);
        session.pump(start);

        let report = session.tick(start + Duration::from_secs(11));

        assert_eq!(report.evicted, vec![session.peers[alice].connection_id]);
        assert!(session.server.clients().is_empty());
        assert_eq!(
            session.peers[alice].client.state(),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn heartbeats_keep_both_sides_alive() {
        let start = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        let alice = session.connect("alice", start);
        session.pump(start);

        for second in 1..=30 {
            let now = start + Duration::from_secs(second);
            session.peers[alice].client.update(now);
            session.tick(now);
        }

        assert_eq!(session.server.clients().len(), 1);
        assert!(session.peers[alice].client.is_connected());
        assert!(session.server.clients().iter().all(|(_, client)| client
            .measured_latency
            .is_some()));
    }

    #[test]
    fn legacy_flat_snapshot_is_applied() {
        let now = Instant::now();
        let mut session = Session::new(SyncConfig::default(), 0);
        let alice = session.connect("alice", now);
        session.pump(now);

        let legacy = json!({
            "type": "world-snapshot",
            "serverTick": 2,
            "timestamp": 0,
            "snapshot": {
                "entityStates": [
                    {"entityId": 9, "position": {"x": 40.0, "y": 60.0}, "health": 75.0},
                    {"position": {"x": 1.0, "y": 1.0}}
                ]
            },
            "processedCommandIds": []
        });
        session.peers[alice]
            .client
            .handle_message(&legacy.to_string(), now);

        let world = session.peers[alice].client.world();
        assert_eq!(world.entity_count(), 1);
        let body = world.entity(9).unwrap();
        assert_approx_eq!(body.x, 40.0, 0.001);
        assert_approx_eq!(body.y, 60.0, 0.001);
        assert_approx_eq!(body.health, 75.0, 0.001);
    }
}

/// REAL SOCKET TESTS
mod websocket_tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use sync_server::network::Server;
    use tokio_tungstenite::tungstenite::Message as Frame;

    /// Tests the join handshake over a real WebSocket connection
    #[tokio::test]
    async fn join_over_websocket() {
        let mut server = Server::new("127.0.0.1:0", Duration::from_millis(16), SyncConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .expect("Failed to connect");
        let join = encode(&Message::join("ws-player", "Socket")).unwrap();
        socket.send(Frame::Text(join)).await.unwrap();

        let welcome = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(frame)) = socket.next().await {
                if let Frame::Text(text) = frame {
                    if let Ok(Message::Welcome(welcome)) = decode(&text) {
                        return Some(welcome);
                    }
                }
            }
            None
        })
        .await
        .expect("Timed out waiting for welcome")
        .expect("Connection closed before welcome");

        assert_eq!(welcome.assigned_player_id, "ws-player");
        assert_eq!(welcome.client_id, "client-1");
        assert_eq!(welcome.connected_player_ids, vec!["ws-player".to_string()]);
        assert_eq!(
            welcome
                .initial_world_state
                .map(|state| state.entity_states.len()),
            Some(1)
        );
    }

    /// Tests that garbage frames do not cost the connection
    #[tokio::test]
    async fn malformed_frames_keep_connection_open() {
        let mut server = Server::new("127.0.0.1:0", Duration::from_millis(16), SyncConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .expect("Failed to connect");
        socket
            .send(Frame::Text("{definitely not json".to_string()))
            .await
            .unwrap();
        socket
            .send(Frame::Text(r#"{"type":"warp-drive"}"#.to_string()))
            .await
            .unwrap();
        socket
            .send(Frame::Text(encode(&Message::ping(5)).unwrap()))
            .await
            .unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(frame)) = socket.next().await {
                if let Frame::Text(text) = frame {
                    if let Ok(message @ Message::Pong { .. }) = decode(&text) {
                        return Some(message);
                    }
                }
            }
            None
        })
        .await
        .expect("Timed out waiting for pong");

        assert_eq!(pong, Some(Message::pong(5)));
    }
}
