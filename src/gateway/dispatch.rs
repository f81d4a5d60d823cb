use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::address::RealmCoordinate;
use crate::engine::NullEngine;
use crate::error::AppError;
use crate::gateway::protocol::{InboundFrame, InstanceStats, OutboundBody, OutboundEnvelope};
use crate::gateway::session::{SessionHandle, SubscribeSpec};
use crate::gateway::GatewayState;
use crate::router::{DeliveryMode, RoutedEvent};

/// Runs field-level validation before a frame's args are used (spec section 4.6
/// "malformed arguments"); collapses `validator`'s multi-field report into one
/// `InvalidInput` message.
fn validate_args<T: Validate>(args: &T) -> Result<(), AppError> {
    args.validate().map_err(|e| AppError::InvalidInput(e.to_string()))
}

/// Dispatches one parsed inbound frame to the matching component call, enforcing
/// the per-action handler deadline (spec section 5 "Cancellation & timeouts",
/// default 5s) and mapping `AppError` onto the wire's stable machine codes.
pub async fn dispatch(state: &GatewayState, session: &Arc<SessionHandle>, frame: InboundFrame) -> OutboundEnvelope {
    let request_id = frame.request_id();
    let deadline = state.handler_deadline;

    match tokio::time::timeout(deadline, handle(state, session, frame)).await {
        Ok(Ok(body)) => OutboundEnvelope::new(request_id, body),
        Ok(Err(e)) => OutboundEnvelope::error(request_id, e.code(), e.message()),
        Err(_elapsed) => OutboundEnvelope::error(request_id, "unavailable", "handler deadline exceeded (timeout)".to_string()),
    }
}

async fn handle(state: &GatewayState, session: &Arc<SessionHandle>, frame: InboundFrame) -> Result<OutboundBody, AppError> {
    match frame {
        InboundFrame::RegisterGame(args) => {
            validate_args(&args)?;
            let coord = RealmCoordinate {
                realm_id: args.realm_id,
                realm_type: args.realm_type,
                adjacency: args.adjacency,
                resonance: args.resonance,
                density: args.density,
                lineage: args.lineage,
                horizon: args.horizon,
            };
            // Per-instance simulation content lives outside the core (spec section
            // 6.3); the gateway-originated registration path hands back a content-
            // free engine until a real out-of-process engine attaches.
            let engine = Arc::new(NullEngine::new(format!("gateway-registered/{}", coord.realm_id)));
            let address = state.registry.register(coord.clone(), engine, session.session_id).await?;
            session.owned_instances.write().insert(address);
            Ok(OutboundBody::GameRegistered { address, coord })
        }

        InboundFrame::UnregisterGame(args) => {
            state.registry.unregister(args.address, session.session_id, session.role.is_admin())?;
            session.owned_instances.write().remove(&args.address);
            Ok(OutboundBody::GameUnregistered { address: args.address })
        }

        InboundFrame::ListGames(_) => Ok(OutboundBody::GameList { games: state.registry.list() }),

        InboundFrame::PublishEvent(args) => {
            validate_args(&args)?;
            let mode = if args.target_address.is_some() { DeliveryMode::Unicast } else { DeliveryMode::Broadcast };
            let event_id = Uuid::new_v4();
            let event = RoutedEvent {
                event_id,
                source: args.source_address,
                target: args.target_address,
                mode,
                kind: args.event_type,
                payload: args.payload,
                emitted_at: chrono::Utc::now(),
            };
            let registry = state.registry.clone();
            state.router.submit(event, move |addr| registry.contains(addr))?;
            Ok(OutboundBody::EventQueued { event_id })
        }

        InboundFrame::Subscribe(args) => {
            session.filter.write().subscribe(SubscribeSpec::from(args.event_types));
            Ok(OutboundBody::Subscribed)
        }

        InboundFrame::Unsubscribe(args) => {
            session.filter.write().unsubscribe(SubscribeSpec::from(args.event_types));
            Ok(OutboundBody::Unsubscribed)
        }

        InboundFrame::AdminStats(_) => {
            if !session.role.is_admin() {
                return Err(AppError::Unauthorized("admin_stats requires an admin session".into()));
            }
            Ok(OutboundBody::Stats {
                instances: instance_stats(state),
                router: state.router.metrics(),
                scheduler: state.scheduler.last_metrics(),
                players: state.player_router.stats(),
            })
        }

        InboundFrame::PlayerCreate(args) => {
            validate_args(&args)?;
            let ctx = state.player_router.create_player(args.display_name, args.race, args.class, args.starting_realm);
            Ok(OutboundBody::PlayerContext(ctx))
        }

        InboundFrame::PlayerTransition(args) => {
            validate_args(&args)?;
            let ctx = state.player_router.transition(args.player_id, &args.src, &args.dst, args.narrative_ctx)?;
            Ok(OutboundBody::PlayerContext(ctx))
        }

        InboundFrame::PlayerContext(args) => {
            let ctx = state.player_router.get_context(args.player_id)?;
            Ok(OutboundBody::PlayerContext(ctx))
        }
    }
}

fn instance_stats(state: &GatewayState) -> InstanceStats {
    let snapshots = state.registry.list();
    let mut by_state = std::collections::BTreeMap::new();
    for s in &snapshots {
        *by_state.entry(format!("{:?}", s.status).to_lowercase()).or_insert(0usize) += 1;
    }
    InstanceStats { total: snapshots.len(), by_state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Horizon;
    use crate::config::Config;
    use crate::gateway::protocol::RegisterGameArgs;
    use crate::gateway::session::{EventFilter, Role};
    use crate::Oasis;
    use tokio::sync::mpsc;

    fn session() -> Arc<SessionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(SessionHandle {
            session_id: Uuid::new_v4(),
            role: Role::Anonymous,
            outbound: tx,
            filter: parking_lot::RwLock::new(EventFilter::default()),
            owned_instances: parking_lot::RwLock::new(Default::default()),
        })
    }

    fn register_args(realm_type: &str) -> RegisterGameArgs {
        RegisterGameArgs {
            request_id: None,
            realm_id: "sol_1".to_string(),
            realm_type: realm_type.to_string(),
            adjacency: "cluster_0".to_string(),
            resonance: "narrative_prime".to_string(),
            density: 0,
            lineage: 0,
            horizon: Horizon::Genesis,
        }
    }

    #[tokio::test]
    async fn register_game_rejects_an_empty_realm_type() {
        let oasis = Oasis::new(Config::for_tests());
        let session = session();

        let reply = dispatch(&oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args(""))).await;
        match reply.body {
            OutboundBody::Error { code, .. } => assert_eq!(code, "invalid_input"),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(oasis.registry.is_empty());
    }

    #[tokio::test]
    async fn publish_event_rejects_an_empty_event_type() {
        let oasis = Oasis::new(Config::for_tests());
        let session = session();

        let register_reply = dispatch(&oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args("sol_system"))).await;
        let source = match register_reply.body {
            OutboundBody::GameRegistered { address, .. } => address,
            other => panic!("unexpected reply: {other:?}"),
        };

        let reply = dispatch(
            &oasis.gateway_state,
            &session,
            InboundFrame::PublishEvent(crate::gateway::protocol::PublishEventArgs {
                request_id: None,
                source_address: source,
                target_address: None,
                event_type: String::new(),
                payload: serde_json::Value::Null,
            }),
        )
        .await;
        match reply.body {
            OutboundBody::Error { code, .. } => assert_eq!(code, "invalid_input"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
