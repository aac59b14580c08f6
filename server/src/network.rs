//! Server network layer: WebSocket connections feeding the synchronization agent

use crate::game::GameWorld;
use crate::sync::{ServerEvent, SyncServer};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_shared::{ConnectionHandle, ConnectionId, Outbound, SyncConfig, TickCounter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as Frame;

/// Main server coordinating connections and the simulation tick
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    sync: SyncServer<GameWorld, TickCounter>,
    tick_duration: Duration,

    // Every connection task reports here; the run loop is the only consumer
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        config: SyncConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            sync: SyncServer::new(config, GameWorld::new(), TickCounter::new()),
            tick_duration,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns task that accepts TCP connections and upgrades them
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let event_tx = self.event_tx.clone();
        let next_id = Arc::new(AtomicU64::new(1));

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let connection_id = next_id.fetch_add(1, Ordering::Relaxed);
                        debug!("Accepted {} as connection {}", addr, connection_id);
                        tokio::spawn(serve_connection(
                            stream,
                            addr,
                            connection_id,
                            event_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Main server loop: transport events and fixed-rate ticks, one at a time
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.sync.handle_event(event, Instant::now()),
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    let tick = self.sync.ticks_mut().step();
                    self.sync.world_mut().step(dt);
                    let report = self.sync.update(now);

                    if !report.evicted.is_empty() {
                        info!("Evicted {} stale connections", report.evicted.len());
                    }

                    // Periodic performance monitoring
                    if tick % 60 == 0 && !self.sync.clients().is_empty() {
                        debug!(
                            "Tick {}: {} clients, {:.1}Hz, {} buffered commands",
                            tick,
                            self.sync.clients().len(),
                            1.0 / dt.max(f32::EPSILON),
                            self.sync.buffered_commands()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

/// Upgrades one TCP stream and pumps frames between it and the run loop
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: ConnectionId,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (mut write, mut read) = socket.split();
    let (handle, mut outbound_rx) = ConnectionHandle::channel(connection_id);
    if event_tx
        .send(ServerEvent::Opened { connection: handle })
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if let Err(e) = write.send(Frame::Text(text)).await {
                        debug!("Write to connection {} failed: {}", connection_id, e);
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
                if event_tx
                    .send(ServerEvent::Message {
                        connection_id,
                        text,
                    })
                    .is_err()
                {
                    break None;
                }
            }
            Some(Ok(Frame::Close(_))) | None => break Some(ServerEvent::Closed { connection_id }),
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                break Some(ServerEvent::Error {
                    connection_id,
                    error: e.to_string(),
                })
            }
        }
    };

    if let Some(event) = closing {
        let _ = event_tx.send(event);
    }
    writer.abort();
}
