//! Tuning constants shared by both synchronization agents.
//!
//! These are compile-time defaults. Binaries layer command line overrides on
//! top of [`SyncConfig::default`].

use crate::protocol::Tick;
use std::time::Duration;

/// Ticks between two snapshot broadcasts.
pub const SNAPSHOT_INTERVAL: Tick = 3;
/// How often a connected peer sends a ping.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Silence longer than this is treated as a dead connection.
pub const TIMEOUT_THRESHOLD: Duration = Duration::from_secs(10);
/// Upper bound for the transport to report "open" after `connect`.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period for the welcome message before the client falls back to its
/// local identity. Must be longer than [`CONNECTION_TIMEOUT`].
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(8);
/// Accepted distance between a command's client tick and the server tick.
pub const TICK_TOLERANCE: Tick = 120;
/// Maximum number of joined clients.
pub const MAX_PLAYERS: usize = 16;
/// Hard cap on remembered command ids. Entries normally leave the ledger by
/// tick age; this only bounds bursts. Sized for [`MAX_PLAYERS`] sending one
/// command per tick across the whole [`TICK_TOLERANCE`] window, twice over.
pub const LEDGER_CAPACITY: usize = 4096;
/// Tick drift absorbed without correction.
pub const TICK_DRIFT_TOLERANCE: Tick = 5;
/// How far behind the server tick a client that ran ahead is rewound.
pub const REWIND_MARGIN: Tick = 10;
/// Drift beyond which the last snapshot is re-applied in full.
pub const MAJOR_DESYNC_THRESHOLD: Tick = 15;
/// Simulation steps per second used by the binaries.
pub const DEFAULT_TICK_RATE: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub snapshot_interval: Tick,
    pub heartbeat_interval: Duration,
    pub timeout_threshold: Duration,
    pub connection_timeout: Duration,
    pub welcome_timeout: Duration,
    pub tick_tolerance: Tick,
    pub max_players: usize,
    pub ledger_capacity: usize,
    pub tick_drift_tolerance: Tick,
    pub rewind_margin: Tick,
    pub major_desync_threshold: Tick,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: SNAPSHOT_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            timeout_threshold: TIMEOUT_THRESHOLD,
            connection_timeout: CONNECTION_TIMEOUT,
            welcome_timeout: WELCOME_TIMEOUT,
            tick_tolerance: TICK_TOLERANCE,
            max_players: MAX_PLAYERS,
            ledger_capacity: LEDGER_CAPACITY,
            tick_drift_tolerance: TICK_DRIFT_TOLERANCE,
            rewind_margin: REWIND_MARGIN,
            major_desync_threshold: MAJOR_DESYNC_THRESHOLD,
        }
    }
}

impl SyncConfig {
    /// Tick duration for a given rate, clamped to at least one tick per second.
    pub fn tick_duration(tick_rate: u32) -> Duration {
        Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64)
    }
}
