use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::address::{Address, Horizon};
use crate::player::types::{ContextSnapshot, MultiverseStats};
use crate::registry::GameInstanceSnapshot;
use crate::router::DeliveredEvent;

/// Inbound wire shape: `{ "action": "...", "request_id": <opt>, ...fields }` (spec
/// section 6.1). `serde(tag = "action")` dispatches straight to the right arg struct.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InboundFrame {
    RegisterGame(RegisterGameArgs),
    UnregisterGame(UnregisterGameArgs),
    ListGames(EmptyArgs),
    PublishEvent(PublishEventArgs),
    Subscribe(SubscribeArgs),
    Unsubscribe(SubscribeArgs),
    AdminStats(EmptyArgs),
    PlayerCreate(PlayerCreateArgs),
    PlayerTransition(PlayerTransitionArgs),
    PlayerContext(PlayerContextArgs),
}

impl InboundFrame {
    pub fn request_id(&self) -> Option<String> {
        match self {
            InboundFrame::RegisterGame(a) => a.request_id.clone(),
            InboundFrame::UnregisterGame(a) => a.request_id.clone(),
            InboundFrame::ListGames(a) => a.request_id.clone(),
            InboundFrame::PublishEvent(a) => a.request_id.clone(),
            InboundFrame::Subscribe(a) => a.request_id.clone(),
            InboundFrame::Unsubscribe(a) => a.request_id.clone(),
            InboundFrame::AdminStats(a) => a.request_id.clone(),
            InboundFrame::PlayerCreate(a) => a.request_id.clone(),
            InboundFrame::PlayerTransition(a) => a.request_id.clone(),
            InboundFrame::PlayerContext(a) => a.request_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct EmptyArgs {
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterGameArgs {
    pub request_id: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub realm_id: String,
    #[validate(length(min = 1, max = 64))]
    pub realm_type: String,
    #[validate(length(min = 1, max = 64))]
    pub adjacency: String,
    #[validate(length(min = 1, max = 64))]
    pub resonance: String,
    pub density: u32,
    pub lineage: u32,
    pub horizon: Horizon,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterGameArgs {
    pub request_id: Option<String>,
    pub address: Address,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PublishEventArgs {
    pub request_id: Option<String>,
    pub source_address: Address,
    pub target_address: Option<Address>,
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum EventFilterWire {
    All(AllMarker),
    Specific(Vec<String>),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AllMarker {
    #[serde(rename = "ALL")]
    All,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeArgs {
    pub request_id: Option<String>,
    pub event_types: EventFilterWire,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlayerCreateArgs {
    pub request_id: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub display_name: String,
    #[validate(length(min = 1, max = 64))]
    pub race: String,
    #[validate(length(min = 1, max = 64))]
    pub class: String,
    #[validate(length(min = 1, max = 64))]
    pub starting_realm: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlayerTransitionArgs {
    pub request_id: Option<String>,
    pub player_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub src: String,
    #[validate(length(min = 1, max = 64))]
    pub dst: String,
    #[validate(length(max = 512))]
    pub narrative_ctx: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayerContextArgs {
    pub request_id: Option<String>,
    pub player_id: Uuid,
}

/// Outbound wire shape: `{ "type": "...", "request_id": <echoed>, "ts": ..., ... }`
/// (spec section 6.1). The reserved `type` vocabulary is the enum variant set.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundBody {
    ConnectionEstablished { session_id: Uuid, replay: Vec<DeliveredEvent> },
    GameRegistered { address: Address, coord: crate::address::RealmCoordinate },
    GameUnregistered { address: Address },
    GameList { games: Vec<GameInstanceSnapshot> },
    EventQueued { event_id: Uuid },
    EventDelivered(DeliveredEvent),
    ControlTickComplete(crate::scheduler::TickMetrics),
    InstancePaused(crate::scheduler::InstancePausedEvent),
    PlayerContext(ContextSnapshot),
    Stats {
        instances: InstanceStats,
        router: crate::router::RouterMetrics,
        scheduler: crate::scheduler::TickMetrics,
        players: MultiverseStats,
    },
    Subscribed,
    Unsubscribed,
    Error { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct InstanceStats {
    pub total: usize,
    pub by_state: std::collections::BTreeMap<String, usize>,
}

/// Envelope wrapping every outbound frame with an echoed `request_id` and an
/// RFC3339 timestamp, flattened so the `type` tag stays at the top level.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope {
    pub request_id: Option<String>,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub body: OutboundBody,
}

impl OutboundEnvelope {
    pub fn new(request_id: Option<String>, body: OutboundBody) -> Self {
        Self { request_id, ts: Utc::now(), body }
    }

    pub fn error(request_id: Option<String>, code: &'static str, message: String) -> Self {
        Self::new(request_id, OutboundBody::Error { code, message })
    }

    pub fn unknown_action(request_id: Option<String>) -> Self {
        Self::error(request_id, "unknown_action", "no handler for this action".to_string())
    }
}

/// The authoritative action set (spec section 4.6). Used to tell "truly unknown
/// action" apart from "known action, malformed arguments" before attempting the
/// full typed parse, since serde's tagged-enum error for both looks the same.
pub const KNOWN_ACTIONS: &[&str] = &[
    "register_game",
    "unregister_game",
    "list_games",
    "publish_event",
    "subscribe",
    "unsubscribe",
    "admin_stats",
    "player_create",
    "player_transition",
    "player_context",
];

pub enum ParseOutcome {
    Frame(InboundFrame),
    UnknownAction(Option<String>),
    Malformed(Option<String>, String),
}

pub fn parse_inbound(raw: &str) -> ParseOutcome {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return ParseOutcome::Malformed(None, e.to_string()),
    };
    let request_id = value.get("request_id").and_then(|v| v.as_str()).map(str::to_string);
    let action = value.get("action").and_then(|v| v.as_str());
    match action {
        None => ParseOutcome::Malformed(request_id, "missing 'action' field".to_string()),
        Some(a) if !KNOWN_ACTIONS.contains(&a) => ParseOutcome::UnknownAction(request_id),
        Some(_) => match serde_json::from_value::<InboundFrame>(value) {
            Ok(frame) => ParseOutcome::Frame(frame),
            Err(e) => ParseOutcome::Malformed(request_id, e.to_string()),
        },
    }
}
