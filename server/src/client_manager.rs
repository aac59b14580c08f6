//! Registry of live connections for the synchronization server
//!
//! This module owns every connection the server knows about, in two stages:
//! - Pending: the transport is open but no `join` has been accepted yet
//! - Joined: a `ConnectedClient` with an assigned identity
//!
//! It enforces the player cap at join time, assigns client and player ids,
//! refreshes activity timestamps, and reports connections that have gone
//! silent. Only the server's single processing task mutates it.

use log::info;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use sync_shared::{ConnectionHandle, ConnectionId};

/// A connection that completed the join handshake
#[derive(Debug)]
pub struct ConnectedClient {
    /// Server-assigned client identifier (`client-N`)
    pub id: String,
    /// Identity all of this client's commands must carry
    pub player_id: String,
    pub player_name: String,
    /// Outbound half of the transport
    pub handle: ConnectionHandle,
    /// Last time any frame arrived from this client
    pub last_message_time: Instant,
    /// Half the round trip of the most recent server ping
    pub measured_latency: Option<Duration>,
    outstanding_ping: Option<(u32, Instant)>,
}

impl ConnectedClient {
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_message_time) > timeout
    }

    pub fn ping_sent(&mut self, sequence: u32, now: Instant) {
        self.outstanding_ping = Some((sequence, now));
    }

    /// Resolves the outstanding ping. Stale or unknown sequences are ignored.
    pub fn pong_received(&mut self, sequence: u32, now: Instant) -> Option<Duration> {
        match self.outstanding_ping {
            Some((expected, sent_at)) if expected == sequence => {
                self.outstanding_ping = None;
                let latency = now.saturating_duration_since(sent_at) / 2;
                self.measured_latency = Some(latency);
                Some(latency)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PendingConnection {
    handle: ConnectionHandle,
    last_message_time: Instant,
}

/// Why a join attempt was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    ServerFull,
    AlreadyJoined,
    UnknownConnection,
}

/// Identity handed out to a freshly admitted client
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    pub client_id: String,
    pub player_id: String,
}

/// A connection that has just been removed from the registry
#[derive(Debug)]
pub struct Departed {
    pub handle: ConnectionHandle,
    /// Set when the connection had joined
    pub player_id: Option<String>,
}

pub struct ClientManager {
    pending: HashMap<ConnectionId, PendingConnection>,
    /// Ordered by connection id so broadcasts and player lists are stable
    clients: BTreeMap<ConnectionId, ConnectedClient>,
    next_client_id: u64,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            pending: HashMap::new(),
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a freshly opened transport awaiting its `join`
    pub fn open(&mut self, handle: ConnectionHandle, now: Instant) {
        info!("Connection {} opened", handle.id());
        self.pending.insert(
            handle.id(),
            PendingConnection {
                handle,
                last_message_time: now,
            },
        );
    }

    /// Promotes a pending connection to a joined client
    ///
    /// The requested player id is kept when it is non-empty and unused;
    /// otherwise `player-{n}` is assigned from the client counter.
    pub fn admit(
        &mut self,
        connection_id: ConnectionId,
        requested_player_id: &str,
        player_name: &str,
        now: Instant,
    ) -> Result<Admitted, AdmissionError> {
        if self.clients.contains_key(&connection_id) {
            return Err(AdmissionError::AlreadyJoined);
        }
        if !self.pending.contains_key(&connection_id) {
            return Err(AdmissionError::UnknownConnection);
        }
        // Enforce server capacity limits
        if self.clients.len() >= self.max_clients {
            return Err(AdmissionError::ServerFull);
        }

        let pending = self
            .pending
            .remove(&connection_id)
            .ok_or(AdmissionError::UnknownConnection)?;

        let number = self.next_client_id;
        self.next_client_id += 1;

        let client_id = format!("client-{}", number);
        let player_id = if requested_player_id.is_empty() || self.player_id_taken(requested_player_id)
        {
            format!("player-{}", number)
        } else {
            requested_player_id.to_string()
        };

        info!(
            "Client {} joined as {} ({})",
            client_id, player_id, player_name
        );
        self.clients.insert(
            connection_id,
            ConnectedClient {
                id: client_id.clone(),
                player_id: player_id.clone(),
                player_name: player_name.to_string(),
                handle: pending.handle,
                last_message_time: now,
                measured_latency: None,
                outstanding_ping: None,
            },
        );

        Ok(Admitted {
            client_id,
            player_id,
        })
    }

    fn player_id_taken(&self, player_id: &str) -> bool {
        self.clients
            .values()
            .any(|client| client.player_id == player_id)
    }

    /// Removes a pending or joined connection
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Departed> {
        if let Some(client) = self.clients.remove(&connection_id) {
            info!("Client {} ({}) removed", client.id, client.player_id);
            return Some(Departed {
                handle: client.handle,
                player_id: Some(client.player_id),
            });
        }

        self.pending.remove(&connection_id).map(|pending| Departed {
            handle: pending.handle,
            player_id: None,
        })
    }

    /// Refreshes the activity timestamp of any known connection
    pub fn touch(&mut self, connection_id: ConnectionId, now: Instant) {
        if let Some(client) = self.clients.get_mut(&connection_id) {
            client.last_message_time = now;
        } else if let Some(pending) = self.pending.get_mut(&connection_id) {
            pending.last_message_time = now;
        }
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&ConnectedClient> {
        self.clients.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut ConnectedClient> {
        self.clients.get_mut(&connection_id)
    }

    /// Outbound handle of a pending or joined connection
    pub fn handle(&self, connection_id: ConnectionId) -> Option<&ConnectionHandle> {
        self.clients
            .get(&connection_id)
            .map(|client| &client.handle)
            .or_else(|| self.pending.get(&connection_id).map(|p| &p.handle))
    }

    /// Connections silent for longer than `timeout`, pending ones included
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let joined = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(now, timeout))
            .map(|(id, _)| *id);
        let pending = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_message_time) > timeout)
            .map(|(id, _)| *id);

        joined.chain(pending).collect()
    }

    pub fn player_ids(&self) -> Vec<String> {
        self.clients
            .values()
            .map(|client| client.player_id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &ConnectedClient)> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ConnectionId, &mut ConnectedClient)> {
        self.clients.iter_mut()
    }

    /// Number of joined clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
