//! Seams between the synchronization agents and the simulation they serve.

use crate::protocol::{InputCommand, Tick};
use crate::snapshot::WorldSnapshot;

/// The authoritative simulation, as seen by the server agent.
pub trait ServerWorld {
    /// Describes the current world; `None` when there is nothing to send.
    fn create_snapshot(&self, tick: Tick) -> Option<WorldSnapshot>;

    /// Called exactly once per admitted command, in ascending tick order.
    fn apply_command(&mut self, command: &InputCommand);

    fn player_joined(&mut self, _player_id: &str, _player_name: &str) {}

    fn player_left(&mut self, _player_id: &str) {}
}

/// The client's local view of the world.
pub trait ClientWorld {
    /// Overwrites local state with the server's.
    fn apply_snapshot(&mut self, snapshot: &WorldSnapshot);

    /// Drops any unconfirmed predicted motion of the player's own entity.
    fn reset_predicted_velocity(&mut self, player_id: &str);
}
