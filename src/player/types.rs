use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PlayerId = Uuid;

/// Closed faction vocabulary, spec section 6.5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Wanderers,
    RealmKeepers,
    ShadowCourt,
    Sages,
    Artisans,
    MerchantGuild,
    WarriorsCircle,
    Mystics,
}

impl Faction {
    pub const ALL: [Faction; 8] = [
        Faction::Wanderers,
        Faction::RealmKeepers,
        Faction::ShadowCourt,
        Faction::Sages,
        Faction::Artisans,
        Faction::MerchantGuild,
        Faction::WarriorsCircle,
        Faction::Mystics,
    ];
}

pub const REPUTATION_MIN: i32 = -10_000;
pub const REPUTATION_MAX: i32 = 10_000;

/// Derived category from a clamped reputation score (spec glossary "Faction standing
/// band"). Thresholds are an implementation decision the spec leaves open; see
/// DESIGN.md.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandingBand {
    Despised,
    Disliked,
    Neutral,
    Liked,
    Revered,
}

pub fn standing_band(reputation: i32) -> StandingBand {
    match reputation {
        i32::MIN..=-6000 => StandingBand::Despised,
        -5999..=-2000 => StandingBand::Disliked,
        -1999..=1999 => StandingBand::Neutral,
        2000..=5999 => StandingBand::Liked,
        _ => StandingBand::Revered,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub item_id: Uuid,
    pub name: String,
    pub item_type: String,
    pub rarity: ItemRarity,
    pub source_realm: String,
    pub transferable: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct TransitionLogEntry {
    pub src_realm: String,
    pub dst_realm: String,
    pub narrative_ctx: String,
    pub ts: DateTime<Utc>,
}

/// Universal player record (spec section 3.4).
#[derive(Clone, Debug, Serialize)]
pub struct UniversalPlayer {
    pub player_id: PlayerId,
    pub display_name: String,
    pub race: String,
    pub class: String,
    pub active_realm: String,
    pub visited_realms: Vec<String>,
    pub inventory: Vec<Item>,
    pub reputation: BTreeMap<Faction, i32>,
    pub transition_log: Vec<TransitionLogEntry>,
}

impl UniversalPlayer {
    pub fn new(display_name: String, race: String, class: String, starting_realm: String) -> Self {
        Self {
            player_id: Uuid::new_v4(),
            display_name,
            race,
            class,
            visited_realms: vec![starting_realm.clone()],
            active_realm: starting_realm,
            inventory: Vec::new(),
            reputation: BTreeMap::new(),
            transition_log: Vec::new(),
        }
    }

    pub fn has_visited(&self, realm_id: &str) -> bool {
        self.visited_realms.iter().any(|r| r == realm_id)
    }

    pub fn has_legendary_item(&self) -> bool {
        self.inventory.iter().any(|i| i.rarity == ItemRarity::Legendary)
    }
}

/// Immutable external view of a player (spec section 4.5 `GetContext`).
#[derive(Clone, Debug, Serialize)]
pub struct ContextSnapshot {
    pub player_id: PlayerId,
    pub display_name: String,
    pub race: String,
    pub class: String,
    pub active_realm: String,
    pub visited_realm_count: usize,
    pub inventory: Vec<Item>,
    pub reputation: BTreeMap<Faction, i32>,
    pub standing: BTreeMap<Faction, StandingBand>,
    pub has_legendary_item: bool,
    pub transition_log: Vec<TransitionLogEntry>,
}

impl From<&UniversalPlayer> for ContextSnapshot {
    fn from(p: &UniversalPlayer) -> Self {
        let standing = p.reputation.iter().map(|(f, rep)| (*f, standing_band(*rep))).collect();
        ContextSnapshot {
            player_id: p.player_id,
            display_name: p.display_name.clone(),
            race: p.race.clone(),
            class: p.class.clone(),
            active_realm: p.active_realm.clone(),
            visited_realm_count: p.visited_realms.len(),
            inventory: p.inventory.clone(),
            reputation: p.reputation.clone(),
            standing,
            has_legendary_item: p.has_legendary_item(),
            transition_log: p.transition_log.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MultiverseStats {
    pub total_players: usize,
    pub players_by_realm: BTreeMap<String, usize>,
    pub average_inventory_size: f64,
    pub average_visited_realms: f64,
    pub players_with_legendary_item: usize,
}
