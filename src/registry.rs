use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::{self, Address, RealmCoordinate};
use crate::engine::TickEngine;
use crate::error::AppError;

pub type SessionId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Registered,
    Running,
    Paused,
    Unregistering,
}

struct MutableState {
    local_tick: u64,
    status: InstanceStatus,
    consecutive_failures: u32,
}

/// A registered game instance (spec section 3.2). `engine` is the external tick
/// handle; everything else the registry itself owns.
pub struct GameInstance {
    pub address: Address,
    pub coord: RealmCoordinate,
    pub registered_at: DateTime<Utc>,
    pub owner: SessionId,
    pub engine: Arc<dyn TickEngine>,
    state: Mutex<MutableState>,
}

impl GameInstance {
    pub fn local_tick(&self) -> u64 {
        self.state.lock().local_tick
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.lock().status
    }

    pub fn snapshot(&self) -> GameInstanceSnapshot {
        let s = self.state.lock();
        GameInstanceSnapshot {
            address: self.address,
            coord: self.coord.clone(),
            local_tick: s.local_tick,
            registered_at: self.registered_at,
            status: s.status,
        }
    }

    pub(crate) fn record_success(&self, n_local_ticks: u64) {
        let mut s = self.state.lock();
        s.local_tick += n_local_ticks;
        s.consecutive_failures = 0;
    }

    /// Returns `true` if this failure just crossed the pause threshold.
    pub(crate) fn record_failure(&self, max_consecutive: u32) -> bool {
        let mut s = self.state.lock();
        s.consecutive_failures += 1;
        if s.consecutive_failures >= max_consecutive && s.status == InstanceStatus::Running {
            s.status = InstanceStatus::Paused;
            return true;
        }
        false
    }

    pub(crate) fn mark_unregistering(&self) {
        self.state.lock().status = InstanceStatus::Unregistering;
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GameInstanceSnapshot {
    pub address: Address,
    pub coord: RealmCoordinate,
    pub local_tick: u64,
    pub registered_at: DateTime<Utc>,
    pub status: InstanceStatus,
}

/// The two maps a registry operation touches, held under one lock so no call site
/// can acquire them in different orders (a prior two-lock split deadlocked against
/// `PlayerRouter::transition`'s `lookup_by_realm_id`, which locked them the other
/// way around).
#[derive(Default)]
pub(crate) struct RegistryState {
    instances: HashMap<Address, Arc<GameInstance>>,
    by_realm_id: HashMap<String, Address>,
}

impl RegistryState {
    pub fn values(&self) -> impl Iterator<Item = &Arc<GameInstance>> {
        self.instances.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Address> {
        self.instances.keys()
    }
}

/// Tracks registered instances, their coordinates and tick engines (spec section 4.2).
/// A single RW lock guards both the address- and realm_id-keyed maps (spec section 5:
/// "Registry: single RW lock"): writers (register/unregister) block the scheduler's
/// snapshot window; readers take the read side or work off a clone.
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { state: RwLock::new(RegistryState::default()) }
    }

    /// Acquire a read guard held across a scheduler control-tick's snapshot+advance
    /// window, so `register`/`unregister` block until the tick finishes (spec
    /// section 5: "registry becomes read-only").
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, RegistryState> {
        self.state.read()
    }

    pub async fn register(
        &self,
        coord: RealmCoordinate,
        engine: Arc<dyn TickEngine>,
        owner: SessionId,
    ) -> Result<Address, AppError> {
        let (address, _canonical) = address::encode(&coord).map_err(|e| AppError::InvalidInput(e.message()))?;

        if self.state.read().by_realm_id.contains_key(&coord.realm_id) {
            return Err(AppError::Conflict(format!("realm_id '{}' already registered", coord.realm_id)));
        }

        // Diagnostic probe; a panicking/failing constructor must leave no partial
        // state (spec section 4.2 "Failure").
        let _ = tokio::time::timeout(std::time::Duration::from_millis(500), engine.describe())
            .await
            .map_err(|_| AppError::Internal("engine registration probe timed out".into()))?;

        let mut state = self.state.write();
        if state.by_realm_id.contains_key(&coord.realm_id) {
            return Err(AppError::Conflict(format!("realm_id '{}' already registered", coord.realm_id)));
        }

        let instance = Arc::new(GameInstance {
            address,
            coord: coord.clone(),
            registered_at: Utc::now(),
            owner,
            engine,
            state: Mutex::new(MutableState { local_tick: 0, status: InstanceStatus::Running, consecutive_failures: 0 }),
        });

        state.instances.insert(address, instance);
        state.by_realm_id.insert(coord.realm_id, address);
        Ok(address)
    }

    pub fn unregister(&self, address: Address, owner: SessionId, is_admin: bool) -> Result<(), AppError> {
        let mut state = self.state.write();
        let instance = state
            .instances
            .get(&address)
            .ok_or_else(|| AppError::NotFound(format!("no instance at address {address}")))?;

        if instance.owner != owner && !is_admin {
            return Err(AppError::Unauthorized("only the owning session or an admin may unregister this instance".into()));
        }

        instance.mark_unregistering();
        let realm_id = instance.coord.realm_id.clone();
        state.instances.remove(&address);
        state.by_realm_id.remove(&realm_id);
        Ok(())
    }

    pub fn list(&self) -> Vec<GameInstanceSnapshot> {
        self.state.read().instances.values().map(|i| i.snapshot()).collect()
    }

    pub fn lookup(&self, address: &Address) -> Option<Arc<GameInstance>> {
        self.state.read().instances.get(address).cloned()
    }

    pub fn lookup_by_realm_id(&self, realm_id: &str) -> Option<Arc<GameInstance>> {
        let state = self.state.read();
        let addr = *state.by_realm_id.get(realm_id)?;
        state.instances.get(&addr).cloned()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.state.read().instances.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.state.read().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
