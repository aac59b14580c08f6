//! The simulation step counter consumed by the synchronization agents.
//!
//! The agents never drive the main loop. They read the current tick and, on
//! the client, force it forward or backward when it drifts from the server.

use crate::protocol::Tick;

pub trait TickSource {
    fn current_tick(&self) -> Tick;
    /// Jumps forward to `tick`; the caller is behind.
    fn advance_to_tick(&mut self, tick: Tick);
    /// Jumps backward to `tick`; the caller ran ahead.
    fn rewind_to_tick(&mut self, tick: Tick);
    /// Adopts a server-given tick outright, e.g. during the join handshake.
    fn sync_with_server(&mut self, tick: Tick);
}

/// Plain counter driven by a fixed-rate loop.
#[derive(Debug, Clone, Default)]
pub struct TickCounter {
    tick: Tick,
}

impl TickCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(tick: Tick) -> Self {
        Self { tick }
    }

    /// Advances by one step and returns the new tick.
    pub fn step(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }
}

impl TickSource for TickCounter {
    fn current_tick(&self) -> Tick {
        self.tick
    }

    fn advance_to_tick(&mut self, tick: Tick) {
        self.tick = self.tick.max(tick);
    }

    fn rewind_to_tick(&mut self, tick: Tick) {
        self.tick = self.tick.min(tick);
    }

    fn sync_with_server(&mut self, tick: Tick) {
        self.tick = tick;
    }
}
