use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::player::types::{
    standing_band, ContextSnapshot, Faction, Item, MultiverseStats, PlayerId, StandingBand, TransitionLogEntry,
    UniversalPlayer, REPUTATION_MAX, REPUTATION_MIN,
};
use crate::registry::Registry;
use crate::router::{DeliveryMode, Router, RoutedEvent};

/// Owns player identity, realm transitions, inventory and reputation, independent
/// of any single instance (spec section 4.5). Per-player operations are serialized
/// by a striped mutex per entry -- the outer `RwLock<HashMap<..>>` is only touched
/// to create/lookup the per-player lock, mirroring the teacher's
/// `RuntimeTokenState` outer-map / per-key mutation split.
pub struct PlayerRouter {
    players: RwLock<HashMap<PlayerId, Arc<Mutex<UniversalPlayer>>>>,
    registry: Arc<Registry>,
    router: Arc<Router>,
}

impl PlayerRouter {
    pub fn new(registry: Arc<Registry>, router: Arc<Router>) -> Self {
        Self { players: RwLock::new(HashMap::new()), registry, router }
    }

    pub fn create_player(&self, display_name: String, race: String, class: String, starting_realm: String) -> ContextSnapshot {
        if self.registry.lookup_by_realm_id(&starting_realm).is_none() {
            warn!(starting_realm, "player created in a realm that is not currently registered");
        }

        let player = UniversalPlayer::new(display_name, race, class, starting_realm);
        let snapshot = ContextSnapshot::from(&player);
        self.players.write().insert(player.player_id, Arc::new(Mutex::new(player)));
        snapshot
    }

    fn entry(&self, player_id: PlayerId) -> Result<Arc<Mutex<UniversalPlayer>>, AppError> {
        self.players
            .read()
            .get(&player_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no player {player_id}")))
    }

    /// `Transition(player_id, src, dst, narrative_ctx)` (spec section 4.5). Rejects
    /// with `NOT_IN_SOURCE` if the player's current realm does not match `src`.
    pub fn transition(
        &self,
        player_id: PlayerId,
        src: &str,
        dst: &str,
        narrative_ctx: String,
    ) -> Result<ContextSnapshot, AppError> {
        let slot = self.entry(player_id)?;
        let snapshot = {
            let mut player = slot.lock();
            if player.active_realm != src {
                return Err(AppError::Conflict(format!(
                    "player is not in source realm '{src}' (NOT_IN_SOURCE, currently in '{}')",
                    player.active_realm
                )));
            }

            player.transition_log.push(TransitionLogEntry {
                src_realm: src.to_string(),
                dst_realm: dst.to_string(),
                narrative_ctx,
                ts: Utc::now(),
            });
            if !player.has_visited(dst) {
                player.visited_realms.push(dst.to_string());
            }
            player.active_realm = dst.to_string();
            // Invariant 7: non-transferable items never migrate.
            player.inventory.retain(|item| item.transferable);

            ContextSnapshot::from(&*player)
        };

        if let Some(src_instance) = self.registry.lookup_by_realm_id(src) {
            let event = RoutedEvent {
                event_id: Uuid::new_v4(),
                source: src_instance.address,
                target: None,
                mode: DeliveryMode::Broadcast,
                kind: "player_traveled".to_string(),
                payload: json!({ "player_id": player_id, "src_realm": src, "dst_realm": dst }),
                emitted_at: Utc::now(),
            };
            if let Err(e) = self.router.submit(event, |addr| self.registry.contains(addr)) {
                warn!(error = %e, "failed to queue player_traveled event");
            }
        }

        Ok(snapshot)
    }

    pub fn modify_reputation(&self, player_id: PlayerId, faction: Faction, delta: i32) -> Result<i32, AppError> {
        let slot = self.entry(player_id)?;
        let mut player = slot.lock();
        let current = player.reputation.entry(faction).or_insert(0);
        *current = (*current + delta).clamp(REPUTATION_MIN, REPUTATION_MAX);
        Ok(*current)
    }

    pub fn add_item(&self, player_id: PlayerId, item: Item) -> Result<(), AppError> {
        let slot = self.entry(player_id)?;
        slot.lock().inventory.push(item);
        Ok(())
    }

    /// Idempotent: removing an item that is not present is not an error.
    pub fn remove_item(&self, player_id: PlayerId, item_id: Uuid) -> Result<(), AppError> {
        let slot = self.entry(player_id)?;
        slot.lock().inventory.retain(|i| i.item_id != item_id);
        Ok(())
    }

    pub fn get_context(&self, player_id: PlayerId) -> Result<ContextSnapshot, AppError> {
        let slot = self.entry(player_id)?;
        let snapshot = ContextSnapshot::from(&*slot.lock());
        Ok(snapshot)
    }

    pub fn get_roster(&self, realm_id: &str) -> Vec<ContextSnapshot> {
        let players = self.players.read();
        players
            .values()
            .filter_map(|slot| {
                let p = slot.lock();
                (p.active_realm == realm_id).then(|| ContextSnapshot::from(&*p))
            })
            .collect()
    }

    pub fn stats(&self) -> MultiverseStats {
        let players = self.players.read();
        let total_players = players.len();
        let mut players_by_realm: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
        let mut inventory_total = 0usize;
        let mut visited_total = 0usize;
        let mut with_legendary = 0usize;

        for slot in players.values() {
            let p = slot.lock();
            *players_by_realm.entry(p.active_realm.clone()).or_insert(0) += 1;
            inventory_total += p.inventory.len();
            visited_total += p.visited_realms.len();
            if p.has_legendary_item() {
                with_legendary += 1;
            }
        }

        let denom = total_players.max(1) as f64;
        MultiverseStats {
            total_players,
            players_by_realm,
            average_inventory_size: inventory_total as f64 / denom,
            average_visited_realms: visited_total as f64 / denom,
            players_with_legendary_item: with_legendary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::types::ItemRarity;

    fn harness() -> PlayerRouter {
        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(64));
        PlayerRouter::new(registry, router)
    }

    #[test]
    fn transition_rejects_wrong_source() {
        let pr = harness();
        let ctx = pr.create_player("Alice".into(), "human".into(), "ranger".into(), "sol_1".into());
        let err = pr.transition(ctx.player_id, "sol_2", "sol_3", "oops".into()).unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn successful_transition_updates_everything() {
        let pr = harness();
        let ctx = pr.create_player("Alice".into(), "human".into(), "ranger".into(), "sol_1".into());
        let after = pr.transition(ctx.player_id, "sol_1", "sol_2", "portal".into()).unwrap();
        assert_eq!(after.active_realm, "sol_2");
        assert_eq!(after.transition_log.len(), 1);
        assert_eq!(after.transition_log[0].dst_realm, "sol_2");
        assert_eq!(after.visited_realm_count, 2);
    }

    #[test]
    fn non_transferable_items_are_stripped_on_transition() {
        let pr = harness();
        let ctx = pr.create_player("Alice".into(), "human".into(), "ranger".into(), "sol_1".into());
        pr.add_item(
            ctx.player_id,
            Item {
                item_id: Uuid::new_v4(),
                name: "Bound Sigil".into(),
                item_type: "trinket".into(),
                rarity: ItemRarity::Rare,
                source_realm: "sol_1".into(),
                transferable: false,
            },
        )
        .unwrap();
        pr.add_item(
            ctx.player_id,
            Item {
                item_id: Uuid::new_v4(),
                name: "Traveler's Coin".into(),
                item_type: "currency".into(),
                rarity: ItemRarity::Common,
                source_realm: "sol_1".into(),
                transferable: true,
            },
        )
        .unwrap();

        let after = pr.transition(ctx.player_id, "sol_1", "sol_2", "portal".into()).unwrap();
        assert_eq!(after.inventory.len(), 1);
        assert!(after.inventory[0].transferable);
    }

    #[test]
    fn reputation_is_clamped() {
        let pr = harness();
        let ctx = pr.create_player("Alice".into(), "human".into(), "ranger".into(), "sol_1".into());
        let v = pr.modify_reputation(ctx.player_id, Faction::Sages, 999_999).unwrap();
        assert_eq!(v, REPUTATION_MAX);
        let v = pr.modify_reputation(ctx.player_id, Faction::Sages, -999_999).unwrap();
        assert_eq!(v, REPUTATION_MIN);
    }

    #[test]
    fn remove_item_is_idempotent() {
        let pr = harness();
        let ctx = pr.create_player("Alice".into(), "human".into(), "ranger".into(), "sol_1".into());
        let missing = Uuid::new_v4();
        pr.remove_item(ctx.player_id, missing).unwrap();
        pr.remove_item(ctx.player_id, missing).unwrap();
    }

    #[test]
    fn standing_band_thresholds() {
        assert_eq!(standing_band(0), StandingBand::Neutral);
        assert_eq!(standing_band(-10_000), StandingBand::Despised);
        assert_eq!(standing_band(10_000), StandingBand::Revered);
    }
}
