use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use sync_shared::factory::now_millis;
use sync_shared::physics::{Body, MoveInput, MOVE_COMMAND};
use sync_shared::{EntityId, InputCommand, ServerWorld, Tick, WorldSnapshot};

/// Authoritative world: one platformer body per joined player.
#[derive(Debug, Default)]
pub struct GameWorld {
    bodies: BTreeMap<EntityId, Body>,
    owners: HashMap<EntityId, String>,
    entities: HashMap<String, EntityId>,
    next_entity_id: EntityId,
    applied_commands: u64,
}

impl GameWorld {
    pub fn new() -> Self {
        Self {
            next_entity_id: 1,
            ..Self::default()
        }
    }

    pub fn step(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            body.integrate(dt);
        }
    }

    pub fn body_of(&self, player_id: &str) -> Option<&Body> {
        self.entities
            .get(player_id)
            .and_then(|entity_id| self.bodies.get(entity_id))
    }

    pub fn player_count(&self) -> usize {
        self.entities.len()
    }

    pub fn applied_commands(&self) -> u64 {
        self.applied_commands
    }
}

impl ServerWorld for GameWorld {
    fn create_snapshot(&self, tick: Tick) -> Option<WorldSnapshot> {
        let mut snapshot = WorldSnapshot::new(tick, now_millis());
        for (entity_id, body) in &self.bodies {
            let owner = self.owners.get(entity_id).map(String::as_str);
            snapshot.add_entity_state(*entity_id, body.to_components(owner));
        }
        Some(snapshot)
    }

    fn apply_command(&mut self, command: &InputCommand) {
        self.applied_commands += 1;

        if command.kind != MOVE_COMMAND {
            warn!(
                "Ignoring command {} of unknown type {}",
                command.id, command.kind
            );
            return;
        }

        let input: MoveInput = match serde_json::from_value(command.payload.clone()) {
            Ok(input) => input,
            Err(e) => {
                warn!("Ignoring command {} with bad payload: {}", command.id, e);
                return;
            }
        };

        if let Some(body) = self
            .entities
            .get(&command.player_id)
            .and_then(|entity_id| self.bodies.get_mut(entity_id))
        {
            body.apply_input(&input);
        }
    }

    fn player_joined(&mut self, player_id: &str, player_name: &str) {
        if self.entities.contains_key(player_id) {
            return;
        }

        let entity_id = self.next_entity_id;
        self.next_entity_id += 1;

        let body = Body::spawn(entity_id);
        info!(
            "Spawned {} ({}) as entity {} at ({}, {})",
            player_id, player_name, entity_id, body.x, body.y
        );
        self.bodies.insert(entity_id, body);
        self.owners.insert(entity_id, player_id.to_string());
        self.entities.insert(player_id.to_string(), entity_id);
    }

    fn player_left(&mut self, player_id: &str) {
        if let Some(entity_id) = self.entities.remove(player_id) {
            self.bodies.remove(&entity_id);
            self.owners.remove(&entity_id);
            info!("Removed entity {} of {}", entity_id, player_id);
        }
    }
}
