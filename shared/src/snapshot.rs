//! World snapshots and their wire payloads.
//!
//! A [`WorldSnapshot`] is built once, handed to the transmission path, and
//! never mutated afterwards. On the wire, entity entries come in one of two
//! shapes: the rich per-component form every current peer emits, and the
//! older flattened position/health/shield form. [`WorldSnapshot::from_payload`]
//! normalizes both into [`EntityState`] and skips entries it cannot identify.

use crate::protocol::Tick;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub type EntityId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentState {
    pub component_type: String,
    pub data: Value,
}

impl ComponentState {
    pub fn new(component_type: impl Into<String>, data: Value) -> Self {
        Self {
            component_type: component_type.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub components: Vec<ComponentState>,
}

impl EntityState {
    pub fn component(&self, component_type: &str) -> Option<&ComponentState> {
        self.components
            .iter()
            .find(|component| component.component_type == component_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    tick: Tick,
    timestamp: u64,
    entities: Vec<EntityState>,
}

impl WorldSnapshot {
    pub fn new(tick: Tick, timestamp: u64) -> Self {
        Self {
            tick,
            timestamp,
            entities: Vec::new(),
        }
    }

    /// Appends one entity's component data.
    ///
    /// Entity ids are unique within a snapshot: adding an id that is already
    /// present replaces the earlier entry in place.
    pub fn add_entity_state(&mut self, entity_id: EntityId, components: Vec<ComponentState>) {
        if let Some(existing) = self
            .entities
            .iter_mut()
            .find(|entity| entity.entity_id == entity_id)
        {
            existing.components = components;
            return;
        }

        self.entities.push(EntityState {
            entity_id,
            components,
        });
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity_states(&self) -> &[EntityState] {
        &self.entities
    }

    pub fn entity(&self, entity_id: EntityId) -> Option<&EntityState> {
        self.entities
            .iter()
            .find(|entity| entity.entity_id == entity_id)
    }

    /// Wire form. Always emitted in the rich per-component shape.
    pub fn to_payload(&self) -> SnapshotPayload {
        SnapshotPayload {
            entity_states: self
                .entities
                .iter()
                .map(|entity| WireEntityState::Rich {
                    entity_id: entity.entity_id,
                    components: entity.components.clone(),
                })
                .collect(),
        }
    }

    /// Builds a canonical snapshot from an inbound payload of either shape.
    pub fn from_payload(tick: Tick, timestamp: u64, payload: &SnapshotPayload) -> Self {
        let mut snapshot = Self::new(tick, timestamp);

        for entry in &payload.entity_states {
            match entry.normalize() {
                Some(entity) => snapshot.add_entity_state(entity.entity_id, entity.components),
                None => warn!("Skipping unrecognized entity state in snapshot {}", tick),
            }
        }

        snapshot
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    #[serde(default)]
    pub entity_states: Vec<WireEntityState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// One entity entry as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEntityState {
    #[serde(rename_all = "camelCase")]
    Rich {
        entity_id: EntityId,
        components: Vec<ComponentState>,
    },
    /// Flattened shape sent by older peers.
    #[serde(rename_all = "camelCase")]
    Flat {
        entity_id: EntityId,
        position: Position,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        health: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shield: Option<f32>,
    },
    /// Missing or invalid id, or a shape this build does not know.
    Unrecognized(Value),
}

impl WireEntityState {
    fn normalize(&self) -> Option<EntityState> {
        match self {
            WireEntityState::Rich {
                entity_id,
                components,
            } => Some(EntityState {
                entity_id: *entity_id,
                components: components.clone(),
            }),
            WireEntityState::Flat {
                entity_id,
                position,
                health,
                shield,
            } => {
                let mut components = vec![ComponentState::new(
                    "position",
                    json!({"x": position.x, "y": position.y}),
                )];
                if let Some(health) = health {
                    components.push(ComponentState::new("health", json!({"value": health})));
                }
                if let Some(shield) = shield {
                    components.push(ComponentState::new("shield", json!({"value": shield})));
                }
                Some(EntityState {
                    entity_id: *entity_id,
                    components,
                })
            }
            WireEntityState::Unrecognized(_) => None,
        }
    }
}
