//! Platformer body shared by the reference worlds.
//!
//! The server integrates bodies authoritatively; the client uses the same
//! rules to predict its own player between snapshots.

use crate::snapshot::{ComponentState, EntityState};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const GRAVITY: f32 = 980.0;
pub const PLAYER_SPEED: f32 = 300.0;
pub const JUMP_VELOCITY: f32 = -400.0;
pub const FLOOR_Y: f32 = 550.0;
pub const WORLD_WIDTH: f32 = 800.0;
pub const PLAYER_SIZE: f32 = 32.0;
pub const MAX_HEALTH: f32 = 100.0;
pub const MAX_SHIELD: f32 = 50.0;

/// Command type carrying a [`MoveInput`] payload.
pub const MOVE_COMMAND: &str = "move";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInput {
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub jump: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub on_ground: bool,
    pub health: f32,
    pub shield: f32,
}

impl Body {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            vel_x: 0.0,
            vel_y: 0.0,
            on_ground: true,
            health: MAX_HEALTH,
            shield: MAX_SHIELD,
        }
    }

    /// Standing on the floor, spread horizontally by spawn slot.
    pub fn spawn(slot: u32) -> Self {
        let x = 100.0 + (slot as f32 * 60.0) % (WORLD_WIDTH - 200.0);
        Self::new(x, FLOOR_Y - PLAYER_SIZE)
    }

    pub fn apply_input(&mut self, input: &MoveInput) {
        self.vel_x = 0.0;
        if input.left {
            self.vel_x -= PLAYER_SPEED;
        }
        if input.right {
            self.vel_x += PLAYER_SPEED;
        }

        if input.jump && self.on_ground {
            self.vel_y = JUMP_VELOCITY;
            self.on_ground = false;
        }
    }

    pub fn integrate(&mut self, dt: f32) {
        if !self.on_ground {
            self.vel_y += GRAVITY * dt;
        }

        self.x += self.vel_x * dt;
        self.y += self.vel_y * dt;

        self.x = self.x.clamp(0.0, WORLD_WIDTH - PLAYER_SIZE);

        if self.y + PLAYER_SIZE >= FLOOR_Y {
            self.y = FLOOR_Y - PLAYER_SIZE;
            self.vel_y = 0.0;
            self.on_ground = true;
        }

        if self.y <= 0.0 {
            self.y = 0.0;
            self.vel_y = 0.0;
        }
    }

    pub fn to_components(&self, owner: Option<&str>) -> Vec<ComponentState> {
        let mut components = vec![
            ComponentState::new("position", json!({"x": self.x, "y": self.y})),
            ComponentState::new(
                "velocity",
                json!({"x": self.vel_x, "y": self.vel_y, "onGround": self.on_ground}),
            ),
            ComponentState::new("health", json!({"value": self.health})),
            ComponentState::new("shield", json!({"value": self.shield})),
        ];
        if let Some(owner) = owner {
            components.push(ComponentState::new("player", json!({"playerId": owner})));
        }
        components
    }

    /// Rebuilds a body and its owning player id from snapshot components.
    ///
    /// Only `position` is required; the legacy flat shape carries no velocity.
    pub fn from_entity_state(entity: &EntityState) -> Option<(Body, Option<String>)> {
        let position = &entity.component("position")?.data;
        let mut body = Body::new(
            position.get("x")?.as_f64()? as f32,
            position.get("y")?.as_f64()? as f32,
        );

        if let Some(velocity) = entity.component("velocity") {
            body.vel_x = read_f32(&velocity.data, "x").unwrap_or(0.0);
            body.vel_y = read_f32(&velocity.data, "y").unwrap_or(0.0);
            body.on_ground = velocity
                .data
                .get("onGround")
                .and_then(|value| value.as_bool())
                .unwrap_or(true);
        }
        if let Some(health) = entity.component("health") {
            body.health = read_f32(&health.data, "value").unwrap_or(MAX_HEALTH);
        }
        if let Some(shield) = entity.component("shield") {
            body.shield = read_f32(&shield.data, "value").unwrap_or(MAX_SHIELD);
        }

        let owner = entity
            .component("player")
            .and_then(|player| player.data.get("playerId"))
            .and_then(|id| id.as_str())
            .map(str::to_string);

        Some((body, owner))
    }
}

fn read_f32(data: &serde_json::Value, key: &str) -> Option<f32> {
    data.get(key)?.as_f64().map(|value| value as f32)
}
