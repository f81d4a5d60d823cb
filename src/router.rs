use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::address::Address;
use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Broadcast,
    Unicast,
}

/// An event queued for the next control tick's drain (spec section 3.3). `target`
/// is `None` for broadcasts and `Some(address)` for unicast.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutedEvent {
    pub event_id: Uuid,
    pub source: Address,
    pub target: Option<Address>,
    pub mode: DeliveryMode,
    pub kind: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// The wire-facing expansion of a `RoutedEvent` at drain time (spec section 6.1
/// `event_delivered`). A broadcast expands to one `DeliveredEvent` per other known
/// instance; a unicast carries its single target through unchanged.
#[derive(Clone, Debug, Serialize)]
pub struct DeliveredEvent {
    pub event_id: Uuid,
    pub source_address: Address,
    pub target_address: Address,
    pub event_type: String,
    pub payload: Value,
    pub control_tick_id: u64,
    pub original_ts: DateTime<Utc>,
    pub delivered_ts: DateTime<Utc>,
}

#[derive(Default, Debug, Serialize)]
pub struct RouterMetrics {
    pub delivered_broadcast: u64,
    pub delivered_unicast: u64,
    pub dropped_total: u64,
    pub dropped_unknown_target: u64,
    pub pending: u64,
}

/// Bounded FIFO of routed events plus delivery bookkeeping (spec section 4.3). The
/// eviction policy mirrors the teacher's `ReorgCache::new_block`: oldest entry first
/// once at capacity, rather than rejecting new arrivals outright.
pub struct Router {
    capacity: usize,
    queue: Mutex<VecDeque<RoutedEvent>>,
    delivered_broadcast: AtomicU64,
    delivered_unicast: AtomicU64,
    dropped_total: AtomicU64,
    dropped_unknown_target: AtomicU64,
}

impl Router {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            delivered_broadcast: AtomicU64::new(0),
            delivered_unicast: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            dropped_unknown_target: AtomicU64::new(0),
        }
    }

    /// Enqueue an event for the next control tick's drain. Validates the unicast/
    /// broadcast target shape and, via `known`, that both source and (for unicast)
    /// target currently exist in the registry -- spec section 4.3's `UNKNOWN_SOURCE`
    /// / `UNKNOWN_TARGET` rejection happens here, synchronously, not at drain.
    pub fn submit(&self, event: RoutedEvent, known: impl Fn(&Address) -> bool) -> Result<(), AppError> {
        if !known(&event.source) {
            return Err(AppError::NotFound(format!("unknown source address {}", event.source)));
        }
        match (event.mode, event.target) {
            (DeliveryMode::Unicast, None) => {
                return Err(AppError::InvalidInput("unicast event requires a target address".into()))
            }
            (DeliveryMode::Broadcast, Some(_)) => {
                return Err(AppError::InvalidInput("broadcast event must not carry a target address".into()))
            }
            (DeliveryMode::Unicast, Some(target)) if !known(&target) => {
                return Err(AppError::NotFound(format!("unknown target address {target}")))
            }
            _ => {}
        }

        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        Ok(())
    }

    /// Drain everything queued since the last control tick, in FIFO order, expanding
    /// broadcasts to one `DeliveredEvent` per other known instance (source excluded)
    /// and re-checking unicast targets in case the instance was unregistered between
    /// submit and drain. Called once per tick by the scheduler.
    pub fn drain(&self, control_tick_id: u64, known_addresses: &[Address]) -> Vec<DeliveredEvent> {
        let drained: Vec<RoutedEvent> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };

        let now = Utc::now();
        let mut out = Vec::with_capacity(drained.len());
        for event in drained {
            match event.mode {
                DeliveryMode::Broadcast => {
                    let mut any = false;
                    for addr in known_addresses {
                        if *addr == event.source {
                            continue;
                        }
                        any = true;
                        out.push(DeliveredEvent {
                            event_id: event.event_id,
                            source_address: event.source,
                            target_address: *addr,
                            event_type: event.kind.clone(),
                            payload: event.payload.clone(),
                            control_tick_id,
                            original_ts: event.emitted_at,
                            delivered_ts: now,
                        });
                    }
                    if any {
                        self.delivered_broadcast.fetch_add(1, Ordering::Relaxed);
                    }
                }
                DeliveryMode::Unicast => {
                    let target = event.target.expect("validated at submit time");
                    if known_addresses.contains(&target) {
                        self.delivered_unicast.fetch_add(1, Ordering::Relaxed);
                        out.push(DeliveredEvent {
                            event_id: event.event_id,
                            source_address: event.source,
                            target_address: target,
                            event_type: event.kind,
                            payload: event.payload,
                            control_tick_id,
                            original_ts: event.emitted_at,
                            delivered_ts: now,
                        });
                    } else {
                        self.dropped_unknown_target.fetch_add(1, Ordering::Relaxed);
                        self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        out
    }

    pub fn metrics(&self) -> RouterMetrics {
        RouterMetrics {
            delivered_broadcast: self.delivered_broadcast.load(Ordering::Relaxed),
            delivered_unicast: self.delivered_unicast.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            dropped_unknown_target: self.dropped_unknown_target.load(Ordering::Relaxed),
            pending: self.queue.lock().len() as u64,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast_event(kind: &str, source: Address) -> RoutedEvent {
        RoutedEvent {
            event_id: Uuid::new_v4(),
            source,
            target: None,
            mode: DeliveryMode::Broadcast,
            kind: kind.to_string(),
            payload: Value::Null,
            emitted_at: Utc::now(),
        }
    }

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; 32];
        bytes[0] = byte;
        Address(bytes)
    }

    #[test]
    fn unknown_source_is_rejected_immediately() {
        let router = Router::new(4);
        let event = broadcast_event("x", addr(1));
        let err = router.submit(event, |_| false).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn unicast_to_unknown_target_is_rejected_immediately() {
        let router = Router::new(4);
        let event = RoutedEvent { mode: DeliveryMode::Unicast, target: Some(addr(2)), ..broadcast_event("ping", addr(1)) };
        let err = router.submit(event, |a| *a == addr(1)).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn broadcast_expands_to_every_other_known_instance() {
        let router = Router::new(4);
        let source = addr(1);
        router.submit(broadcast_event("world_event", source), |_| true).unwrap();

        let known = vec![addr(1), addr(2), addr(3)];
        let delivered = router.drain(1, &known);
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|d| d.source_address == source));
        assert!(delivered.iter().any(|d| d.target_address == addr(2)));
        assert!(delivered.iter().any(|d| d.target_address == addr(3)));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let router = Router::new(2);
        router.submit(broadcast_event("a", addr(1)), |_| true).unwrap();
        router.submit(broadcast_event("b", addr(1)), |_| true).unwrap();
        router.submit(broadcast_event("c", addr(1)), |_| true).unwrap();
        assert_eq!(router.pending_len(), 2);
        let delivered = router.drain(1, &[addr(1), addr(2)]);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].event_type, "b");
        assert_eq!(delivered[1].event_type, "c");
        assert_eq!(router.metrics().dropped_total, 1);
    }

    #[test]
    fn unicast_target_removed_before_drain_is_dropped_not_delivered() {
        let router = Router::new(4);
        let event = RoutedEvent { mode: DeliveryMode::Unicast, target: Some(addr(2)), ..broadcast_event("ping", addr(1)) };
        router.submit(event, |_| true).unwrap();
        let delivered = router.drain(1, &[addr(1)]);
        assert!(delivered.is_empty());
        assert_eq!(router.metrics().dropped_unknown_target, 1);
    }
}
