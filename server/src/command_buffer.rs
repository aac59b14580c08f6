//! Tick-ordered command queue and the processed-command ledger.
//!
//! Commands may arrive in any order; the buffer keeps them sorted by client
//! tick (ties in arrival order) and only releases those whose tick has been
//! reached. The ledger remembers applied ids for as long as a retransmission
//! could still pass the tick window, so no command is applied twice.

use log::warn;
use std::collections::{HashSet, VecDeque};
use sync_shared::{InputCommand, Tick};

#[derive(Debug, Default)]
pub struct CommandBuffer {
    queue: VecDeque<InputCommand>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after every command with a tick lower than or equal to this one.
    pub fn insert(&mut self, command: InputCommand) {
        let position = self
            .queue
            .partition_point(|queued| queued.client_tick <= command.client_tick);
        self.queue.insert(position, command);
    }

    pub fn contains(&self, command_id: &str) -> bool {
        self.queue.iter().any(|queued| queued.id == command_id)
    }

    /// Removes and returns the commands whose tick does not exceed `current_tick`.
    pub fn drain_ready(&mut self, current_tick: Tick) -> Vec<InputCommand> {
        let mut ready = Vec::new();
        while self
            .queue
            .front()
            .is_some_and(|head| head.client_tick <= current_tick)
        {
            if let Some(command) = self.queue.pop_front() {
                ready.push(command);
            }
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Record of applied command ids, each tagged with its client tick.
///
/// Entries are evicted by tick age once they fall behind the accepted tick
/// window, since validation rejects those commands before the ledger is
/// consulted. The capacity is a backstop that drops the oldest entry when a
/// burst of commands fills the ledger before any of them has aged out.
#[derive(Debug)]
pub struct ProcessedLedger {
    order: VecDeque<(String, Tick)>,
    ids: HashSet<String>,
    capacity: usize,
}

impl ProcessedLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, command_id: &str) -> bool {
        self.ids.contains(command_id)
    }

    /// Returns `false` if the id was already recorded.
    pub fn record(&mut self, command_id: &str, client_tick: Tick) -> bool {
        if self.ids.contains(command_id) {
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                warn!("Ledger full, forgetting command {}", oldest);
                self.ids.remove(&oldest);
            }
        }

        self.order.push_back((command_id.to_string(), client_tick));
        self.ids.insert(command_id.to_string());
        true
    }

    /// Forgets every entry whose client tick is below `oldest_tick`.
    pub fn evict_before(&mut self, oldest_tick: Tick) -> usize {
        let before = self.order.len();
        let ids = &mut self.ids;
        self.order.retain(|(id, tick)| {
            let keep = *tick >= oldest_tick;
            if !keep {
                ids.remove(id);
            }
            keep
        });
        before - self.order.len()
    }

    /// Recorded ids, oldest first.
    pub fn ids(&self) -> Vec<String> {
        self.order.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn command(id: &str, client_tick: Tick) -> InputCommand {
        InputCommand {
            id: id.to_string(),
            kind: "move".to_string(),
            client_tick,
            player_id: "p".to_string(),
            payload: Value::Null,
        }
    }

    #[test]
    fn test_out_of_order_arrival_drains_in_tick_order() {
        let mut buffer = CommandBuffer::new();
        buffer.insert(command("a", 5));
        buffer.insert(command("b", 2));
        buffer.insert(command("c", 8));
        buffer.insert(command("d", 2));

        let drained: Vec<(String, Tick)> = buffer
            .drain_ready(10)
            .into_iter()
            .map(|c| (c.id, c.client_tick))
            .collect();

        assert_eq!(
            drained,
            vec![
                ("b".to_string(), 2),
                ("d".to_string(), 2),
                ("a".to_string(), 5),
                ("c".to_string(), 8),
            ]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_never_drains_future_ticks() {
        let mut buffer = CommandBuffer::new();
        buffer.insert(command("a", 5));
        buffer.insert(command("b", 2));
        buffer.insert(command("c", 8));

        let first: Vec<Tick> = buffer.drain_ready(5).iter().map(|c| c.client_tick).collect();
        assert_eq!(first, vec![2, 5]);
        assert_eq!(buffer.len(), 1);

        assert!(buffer.drain_ready(7).is_empty());
        assert_eq!(buffer.drain_ready(8).len(), 1);
    }

    #[test]
    fn test_contains() {
        let mut buffer = CommandBuffer::new();
        buffer.insert(command("x", 1));
        assert!(buffer.contains("x"));
        assert!(!buffer.contains("y"));
    }

    #[test]
    fn test_ledger_rejects_duplicates() {
        let mut ledger = ProcessedLedger::new(4);
        assert!(ledger.record("a", 1));
        assert!(!ledger.record("a", 1));
        assert!(ledger.contains("a"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_evicts_by_tick_age() {
        let mut ledger = ProcessedLedger::new(16);
        // Applied out of tick order: a late command for tick 2 lands after tick 6.
        ledger.record("a", 3);
        ledger.record("b", 6);
        ledger.record("c", 2);
        ledger.record("d", 9);

        assert_eq!(ledger.evict_before(4), 2);
        assert_eq!(ledger.ids(), vec!["b", "d"]);
        assert!(!ledger.contains("a"));
        assert!(!ledger.contains("c"));

        assert_eq!(ledger.evict_before(4), 0);
        assert!(!ledger.record("b", 6));
    }

    #[test]
    fn test_ledger_backstop_drops_oldest_when_full() {
        let mut ledger = ProcessedLedger::new(3);
        for (tick, id) in ["a", "b", "c", "d"].into_iter().enumerate() {
            assert!(ledger.record(id, tick as Tick));
        }

        assert_eq!(ledger.len(), 3);
        assert!(!ledger.contains("a"));
        assert_eq!(ledger.ids(), vec!["b", "c", "d"]);
        assert!(!ledger.record("d", 3));
    }

    #[test]
    fn test_ledger_zero_capacity_still_holds_one() {
        let mut ledger = ProcessedLedger::new(0);
        assert_eq!(ledger.capacity(), 1);
        ledger.record("a", 1);
        ledger.record("b", 2);
        assert_eq!(ledger.ids(), vec!["b"]);
    }
}
