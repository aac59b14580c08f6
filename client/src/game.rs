use log::debug;
use std::collections::{BTreeMap, HashMap};
use sync_shared::physics::{Body, MoveInput};
use sync_shared::{ClientWorld, EntityId, Tick, WorldSnapshot};

/// Local copy of the world: overwritten by every snapshot, with the player's
/// own body predicted forward between them.
#[derive(Debug, Default)]
pub struct PredictedWorld {
    bodies: BTreeMap<EntityId, Body>,
    owners: HashMap<String, EntityId>,
    confirmed_tick: Option<Tick>,
    corrections: u64,
}

impl PredictedWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies input to the player's body immediately, ahead of the server.
    pub fn predict(&mut self, player_id: &str, input: &MoveInput) {
        if let Some(body) = self.body_of_mut(player_id) {
            body.apply_input(input);
        }
    }

    pub fn step(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            body.integrate(dt);
        }
    }

    pub fn body_of(&self, player_id: &str) -> Option<&Body> {
        self.owners
            .get(player_id)
            .and_then(|entity_id| self.bodies.get(entity_id))
    }

    fn body_of_mut(&mut self, player_id: &str) -> Option<&mut Body> {
        let entity_id = self.owners.get(player_id)?;
        self.bodies.get_mut(entity_id)
    }

    pub fn entity(&self, entity_id: EntityId) -> Option<&Body> {
        self.bodies.get(&entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn confirmed_tick(&self) -> Option<Tick> {
        self.confirmed_tick
    }

    /// Number of snapshots that moved a body away from where we predicted it.
    pub fn corrections(&self) -> u64 {
        self.corrections
    }
}

impl ClientWorld for PredictedWorld {
    fn apply_snapshot(&mut self, snapshot: &WorldSnapshot) {
        let mut bodies = BTreeMap::new();
        let mut owners = HashMap::new();

        for entity in snapshot.entity_states() {
            let Some((body, owner)) = Body::from_entity_state(entity) else {
                debug!("Entity {} has no position, skipping", entity.entity_id);
                continue;
            };

            if let Some(previous) = self.bodies.get(&entity.entity_id) {
                let dx = previous.x - body.x;
                let dy = previous.y - body.y;
                if (dx * dx + dy * dy).sqrt() > 5.0 {
                    self.corrections += 1;
                }
            }

            if let Some(owner) = owner {
                owners.insert(owner, entity.entity_id);
            }
            bodies.insert(entity.entity_id, body);
        }

        self.bodies = bodies;
        self.owners = owners;
        self.confirmed_tick = Some(snapshot.tick());
    }

    fn reset_predicted_velocity(&mut self, player_id: &str) {
        if let Some(body) = self.body_of_mut(player_id) {
            body.vel_x = 0.0;
            body.vel_y = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use sync_shared::physics::PLAYER_SPEED;

    fn snapshot_with(tick: Tick, bodies: &[(EntityId, &str, Body)]) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::new(tick, 0);
        for (entity_id, owner, body) in bodies {
            snapshot.add_entity_state(*entity_id, body.to_components(Some(owner)));
        }
        snapshot
    }

    #[test]
    fn test_snapshot_replaces_world() {
        let mut world = PredictedWorld::new();
        world.apply_snapshot(&snapshot_with(
            5,
            &[(1, "a", Body::new(10.0, 20.0)), (2, "b", Body::new(30.0, 40.0))],
        ));
        assert_eq!(world.entity_count(), 2);

        world.apply_snapshot(&snapshot_with(8, &[(2, "b", Body::new(31.0, 40.0))]));

        assert_eq!(world.entity_count(), 1);
        assert!(world.body_of("a").is_none());
        assert_eq!(world.confirmed_tick(), Some(8));
        assert_approx_eq!(world.body_of("b").unwrap().x, 31.0, 0.001);
    }

    #[test]
    fn test_prediction_moves_own_body() {
        let mut world = PredictedWorld::new();
        world.apply_snapshot(&snapshot_with(1, &[(1, "me", Body::new(100.0, 100.0))]));

        world.predict(
            "me",
            &MoveInput {
                right: true,
                ..MoveInput::default()
            },
        );
        world.step(0.1);

        assert_approx_eq!(world.body_of("me").unwrap().x, 100.0 + PLAYER_SPEED * 0.1, 0.01);
    }

    #[test]
    fn test_reset_predicted_velocity() {
        let mut world = PredictedWorld::new();
        world.apply_snapshot(&snapshot_with(1, &[(1, "me", Body::new(100.0, 100.0))]));
        world.predict(
            "me",
            &MoveInput {
                left: true,
                jump: true,
                ..MoveInput::default()
            },
        );
        world.step(0.016);
        assert!(!world.body_of("me").unwrap().on_ground);

        world.reset_predicted_velocity("me");

        let body = world.body_of("me").unwrap();
        assert_eq!(body.vel_x, 0.0);
        assert_eq!(body.vel_y, 0.0);
        world.reset_predicted_velocity("nobody");
    }

    #[test]
    fn test_large_correction_is_counted() {
        let mut world = PredictedWorld::new();
        world.apply_snapshot(&snapshot_with(1, &[(1, "me", Body::new(100.0, 100.0))]));
        world.apply_snapshot(&snapshot_with(2, &[(1, "me", Body::new(102.0, 100.0))]));
        assert_eq!(world.corrections(), 0);

        world.apply_snapshot(&snapshot_with(3, &[(1, "me", Body::new(150.0, 100.0))]));
        assert_eq!(world.corrections(), 1);
    }
}
