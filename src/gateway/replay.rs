use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::router::DeliveredEvent;

/// Bounded ring of the last R outbound `DeliveredEvent`s (spec section 4.6 "Replay
/// buffer"), handed to every newly connected session on `connection_established`.
/// Eviction policy mirrors `Router`'s own oldest-first eviction.
pub struct ReplayBuffer {
    capacity: usize,
    buffer: Mutex<VecDeque<DeliveredEvent>>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), buffer: Mutex::new(VecDeque::with_capacity(capacity.min(4096))) }
    }

    pub fn record(&self, event: DeliveredEvent) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
    }

    /// Returns up to `min(R, events_since_startup)` events in original broadcast
    /// order (spec invariant 9 "Replay completeness").
    pub fn snapshot(&self) -> Vec<DeliveredEvent> {
        self.buffer.lock().iter().cloned().collect()
    }
}
