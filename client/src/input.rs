//! Scripted player input with change detection
//!
//! The headless client has no keyboard, so movement comes from a small random
//! walk: hold a direction for a while, occasionally jump. Input is only sent
//! when it changes or when the keep-alive interval has passed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use sync_shared::physics::MoveInput;

const JUMP_CHANCE: f64 = 0.05;
const MIN_HOLD_FRAMES: u32 = 10;
const MAX_HOLD_FRAMES: u32 = 60;

pub struct InputManager {
    rng: StdRng,
    current_input: MoveInput,
    hold_frames: u32,
    keep_alive: Duration,
    last_input_sent: Option<Instant>,
}

impl InputManager {
    pub fn new(keep_alive: Duration) -> Self {
        Self::with_rng(StdRng::from_entropy(), keep_alive)
    }

    /// Deterministic input sequence, for tests and reproducible runs.
    pub fn seeded(seed: u64, keep_alive: Duration) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), keep_alive)
    }

    fn with_rng(rng: StdRng, keep_alive: Duration) -> Self {
        Self {
            rng,
            current_input: MoveInput::default(),
            hold_frames: 0,
            keep_alive,
            last_input_sent: None,
        }
    }

    /// Samples the next frame and returns input worth sending, if any.
    pub fn update(&mut self, now: Instant) -> Option<MoveInput> {
        let next = self.sample();
        let changed = next != self.current_input;
        self.current_input = next;

        let time_to_send = self
            .last_input_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= self.keep_alive);

        if changed || time_to_send {
            self.last_input_sent = Some(now);
            Some(next)
        } else {
            None
        }
    }

    fn sample(&mut self) -> MoveInput {
        let mut input = self.current_input;
        // Jump is a press, not a hold.
        input.jump = false;

        if self.hold_frames == 0 {
            let direction = self.rng.gen_range(0..3);
            input.left = direction == 0;
            input.right = direction == 1;
            self.hold_frames = self.rng.gen_range(MIN_HOLD_FRAMES..=MAX_HOLD_FRAMES);
        } else {
            self.hold_frames -= 1;
        }

        if self.rng.gen_bool(JUMP_CHANCE) {
            input.jump = true;
        }

        input
    }

    pub fn current_input(&self) -> &MoveInput {
        &self.current_input
    }
}
