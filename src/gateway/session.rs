use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::address::Address;
use crate::gateway::protocol::OutboundEnvelope;

pub type SessionId = Uuid;

/// Connection role (spec section 4.6 "Auth model"). The core treats the mapping
/// from handshake/token to role as an opaque external decision; `Role` is simply
/// what that decision settles on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Anonymous,
    Authenticated,
    Admin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Clone, Debug, Default)]
pub enum EventFilter {
    #[default]
    None,
    All,
    Only(HashSet<String>),
}

impl EventFilter {
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventFilter::None => false,
            EventFilter::All => true,
            EventFilter::Only(set) => set.contains(event_type),
        }
    }

    pub fn subscribe(&mut self, types: SubscribeSpec) {
        match (&mut *self, types) {
            (_, SubscribeSpec::All) => *self = EventFilter::All,
            (EventFilter::All, SubscribeSpec::Specific(_)) => {}
            (EventFilter::Only(set), SubscribeSpec::Specific(new)) => set.extend(new),
            (slot @ EventFilter::None, SubscribeSpec::Specific(new)) => *slot = EventFilter::Only(new.into_iter().collect()),
        }
    }

    pub fn unsubscribe(&mut self, types: SubscribeSpec) {
        match (&mut *self, types) {
            (_, SubscribeSpec::All) => *self = EventFilter::None,
            (EventFilter::All, SubscribeSpec::Specific(_)) => {}
            (EventFilter::Only(set), SubscribeSpec::Specific(remove)) => {
                for t in remove {
                    set.remove(&t);
                }
            }
            (EventFilter::None, SubscribeSpec::Specific(_)) => {}
        }
    }
}

pub enum SubscribeSpec {
    All,
    Specific(Vec<String>),
}

impl From<crate::gateway::protocol::EventFilterWire> for SubscribeSpec {
    fn from(w: crate::gateway::protocol::EventFilterWire) -> Self {
        match w {
            crate::gateway::protocol::EventFilterWire::All(_) => SubscribeSpec::All,
            crate::gateway::protocol::EventFilterWire::Specific(v) => SubscribeSpec::Specific(v),
        }
    }
}

/// Per-session handle held by the sessions table. The outbound sender is bounded
/// (spec section 4.6 "Backpressure"): `try_send` overflow triggers a `slow_consumer`
/// disconnect rather than blocking the scheduler or gateway write task.
pub struct SessionHandle {
    pub session_id: SessionId,
    pub role: Role,
    pub outbound: mpsc::Sender<OutboundEnvelope>,
    pub filter: RwLock<EventFilter>,
    pub owned_instances: RwLock<HashSet<Address>>,
}

impl SessionHandle {
    pub fn try_deliver(&self, envelope: OutboundEnvelope) -> Result<(), ()> {
        self.outbound.try_send(envelope).map_err(|_| ())
    }
}

/// RW-locked sessions table (spec section 5 "Shared-resource policy"); each
/// session's own state is otherwise owned exclusively by its writer task.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.write().insert(handle.session_id, handle);
    }

    pub fn remove(&self, session_id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.write().remove(&session_id)
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(&session_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
