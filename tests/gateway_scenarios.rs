mod support;

use std::sync::Arc;

use oasis_core::address::Horizon;
use oasis_core::gateway::dispatch::dispatch;
use oasis_core::gateway::protocol::{
    EventFilterWire, InboundFrame, OutboundBody, PlayerContextArgs, PlayerCreateArgs, PlayerTransitionArgs,
    PublishEventArgs, RegisterGameArgs, SubscribeArgs, UnregisterGameArgs,
};
use oasis_core::gateway::session::{EventFilter, Role, SessionHandle};
use support::harness::{session_id, test_oasis};
use tokio::sync::mpsc;

fn session(role: Role) -> (Arc<SessionHandle>, mpsc::Receiver<oasis_core::gateway::protocol::OutboundEnvelope>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = Arc::new(SessionHandle {
        session_id: session_id(),
        role,
        outbound: tx,
        filter: parking_lot::RwLock::new(EventFilter::default()),
        owned_instances: parking_lot::RwLock::new(Default::default()),
    });
    (handle, rx)
}

fn register_args(realm_id: &str) -> RegisterGameArgs {
    RegisterGameArgs {
        request_id: None,
        realm_id: realm_id.to_string(),
        realm_type: "sol_system".to_string(),
        adjacency: "cluster_0".to_string(),
        resonance: "narrative_prime".to_string(),
        density: 0,
        lineage: 0,
        horizon: Horizon::Genesis,
    }
}

#[tokio::test]
async fn e1_registration_then_list() {
    let h = test_oasis();
    let (session, _rx) = session(Role::Anonymous);

    let reply = dispatch(&h.oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args("sol_1"))).await;
    let address = match reply.body {
        OutboundBody::GameRegistered { address, coord } => {
            assert_eq!(coord.realm_id, "sol_1");
            assert_eq!(address.to_hex().len(), 64);
            address
        }
        other => panic!("unexpected reply: {other:?}"),
    };

    let list_reply = dispatch(&h.oasis.gateway_state, &session, InboundFrame::ListGames(Default::default())).await;
    match list_reply.body {
        OutboundBody::GameList { games } => {
            assert_eq!(games.len(), 1);
            assert_eq!(games[0].address, address);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn e2_duplicate_registration_is_rejected() {
    let h = test_oasis();
    let (session, _rx) = session(Role::Anonymous);

    dispatch(&h.oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args("sol_1"))).await;
    let reply = dispatch(&h.oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args("sol_1"))).await;

    match reply.body {
        OutboundBody::Error { code, message } => {
            assert_eq!(code, "conflict");
            assert!(message.contains("sol_1"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    let list_reply = dispatch(&h.oasis.gateway_state, &session, InboundFrame::ListGames(Default::default())).await;
    match list_reply.body {
        OutboundBody::GameList { games } => assert_eq!(games.len(), 1),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn e4_unicast_to_zero_address_is_not_found() {
    let h = test_oasis();
    let (session, _rx) = session(Role::Anonymous);

    let register_reply = dispatch(&h.oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args("sol_1"))).await;
    let source = match register_reply.body {
        OutboundBody::GameRegistered { address, .. } => address,
        other => panic!("unexpected reply: {other:?}"),
    };

    let reply = dispatch(
        &h.oasis.gateway_state,
        &session,
        InboundFrame::PublishEvent(PublishEventArgs {
            request_id: None,
            source_address: source,
            target_address: Some(oasis_core::address::Address::ZERO),
            event_type: "ping".to_string(),
            payload: serde_json::Value::Null,
        }),
    )
    .await;

    match reply.body {
        OutboundBody::Error { code, .. } => assert_eq!(code, "not_found"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn e5_player_transition_updates_context_and_queues_travel_event() {
    let h = test_oasis();
    let (session, _rx) = session(Role::Anonymous);

    dispatch(&h.oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args("sol_1"))).await;
    dispatch(&h.oasis.gateway_state, &session, InboundFrame::RegisterGame(register_args("sol_2"))).await;

    let create_reply = dispatch(
        &h.oasis.gateway_state,
        &session,
        InboundFrame::PlayerCreate(PlayerCreateArgs {
            request_id: None,
            display_name: "Alice".to_string(),
            race: "human".to_string(),
            class: "ranger".to_string(),
            starting_realm: "sol_1".to_string(),
        }),
    )
    .await;
    let player_id = match create_reply.body {
        OutboundBody::PlayerContext(ctx) => ctx.player_id,
        other => panic!("unexpected reply: {other:?}"),
    };

    let transition_reply = dispatch(
        &h.oasis.gateway_state,
        &session,
        InboundFrame::PlayerTransition(PlayerTransitionArgs {
            request_id: None,
            player_id,
            src: "sol_1".to_string(),
            dst: "sol_2".to_string(),
            narrative_ctx: "portal".to_string(),
        }),
    )
    .await;

    match transition_reply.body {
        OutboundBody::PlayerContext(ctx) => {
            assert_eq!(ctx.active_realm, "sol_2");
            assert_eq!(ctx.visited_realm_count, 2);
            assert_eq!(ctx.transition_log.len(), 1);
            assert_eq!(ctx.transition_log[0].dst_realm, "sol_2");
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    assert_eq!(h.oasis.event_router.pending_len(), 1);

    let context_reply = dispatch(
        &h.oasis.gateway_state,
        &session,
        InboundFrame::PlayerContext(PlayerContextArgs { request_id: None, player_id }),
    )
    .await;
    match context_reply.body {
        OutboundBody::PlayerContext(ctx) => assert_eq!(ctx.active_realm, "sol_2"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn admin_stats_requires_admin_role() {
    let h = test_oasis();
    let (anon, _rx) = session(Role::Anonymous);
    let (admin, _rx2) = session(Role::Admin);

    let denied = dispatch(&h.oasis.gateway_state, &anon, InboundFrame::AdminStats(Default::default())).await;
    match denied.body {
        OutboundBody::Error { code, .. } => assert_eq!(code, "unauthorized"),
        other => panic!("unexpected reply: {other:?}"),
    }

    let allowed = dispatch(&h.oasis.gateway_state, &admin, InboundFrame::AdminStats(Default::default())).await;
    assert!(matches!(allowed.body, OutboundBody::Stats { .. }));
}

#[tokio::test]
async fn ownership_guards_unregister() {
    let h = test_oasis();
    let (owner, _rx) = session(Role::Anonymous);
    let (other, _rx2) = session(Role::Anonymous);

    let register_reply = dispatch(&h.oasis.gateway_state, &owner, InboundFrame::RegisterGame(register_args("sol_1"))).await;
    let address = match register_reply.body {
        OutboundBody::GameRegistered { address, .. } => address,
        other => panic!("unexpected reply: {other:?}"),
    };

    let denied = dispatch(
        &h.oasis.gateway_state,
        &other,
        InboundFrame::UnregisterGame(UnregisterGameArgs { request_id: None, address }),
    )
    .await;
    match denied.body {
        OutboundBody::Error { code, .. } => assert_eq!(code, "unauthorized"),
        other => panic!("unexpected reply: {other:?}"),
    }

    let allowed = dispatch(
        &h.oasis.gateway_state,
        &owner,
        InboundFrame::UnregisterGame(UnregisterGameArgs { request_id: None, address }),
    )
    .await;
    assert!(matches!(allowed.body, OutboundBody::GameUnregistered { .. }));
}

#[tokio::test]
async fn subscribe_all_then_unsubscribe_clears_filter() {
    let h = test_oasis();
    let (session, _rx) = session(Role::Anonymous);

    let reply = dispatch(
        &h.oasis.gateway_state,
        &session,
        InboundFrame::Subscribe(SubscribeArgs {
            request_id: None,
            event_types: EventFilterWire::Specific(vec!["world_event".to_string()]),
        }),
    )
    .await;
    assert!(matches!(reply.body, OutboundBody::Subscribed));
    assert!(session.filter.read().matches("world_event"));
    assert!(!session.filter.read().matches("other_event"));

    dispatch(
        &h.oasis.gateway_state,
        &session,
        InboundFrame::Unsubscribe(SubscribeArgs { request_id: None, event_types: EventFilterWire::Specific(vec!["world_event".to_string()]) }),
    )
    .await;
    assert!(!session.filter.read().matches("world_event"));
}
