mod support;

use std::time::Duration;

use oasis_core::config::Config;
use serde_json::json;
use support::ws::{connect, recv_json, recv_until, send, spawn_server};

fn register_frame(realm_id: &str) -> serde_json::Value {
    json!({
        "action": "register_game",
        "realm_id": realm_id,
        "realm_type": "sol_system",
        "adjacency": "cluster_0",
        "resonance": "narrative_prime",
        "density": 0,
        "lineage": 0,
        "horizon": "genesis",
    })
}

/// Spec E3: a broadcast published from one registered instance reaches a session
/// subscribed to `ALL`, tagged with the scheduler's current control-tick id, within
/// one control-tick period -- exercised end to end through `handle_socket`'s real
/// fan-out task rather than `dispatch::dispatch()` directly.
#[tokio::test]
async fn e3_broadcast_event_reaches_a_subscriber_through_a_real_control_tick() {
    let (_oasis, url) = spawn_server(Config::for_tests()).await;

    let mut owner = connect(&url).await;
    let _ = recv_json(&mut owner).await; // connection_established

    send(&mut owner, register_frame("sol_1")).await;
    let sol_1 = recv_json(&mut owner).await;
    let sol_1_addr = sol_1["address"].as_str().expect("registered address").to_string();

    send(&mut owner, register_frame("sol_2")).await;
    let sol_2 = recv_json(&mut owner).await;
    let sol_2_addr = sol_2["address"].as_str().expect("registered address").to_string();

    let mut subscriber = connect(&url).await;
    let _ = recv_json(&mut subscriber).await; // connection_established
    send(&mut subscriber, json!({"action": "subscribe", "event_types": "ALL"})).await;
    let subscribed = recv_json(&mut subscriber).await;
    assert_eq!(subscribed["type"], "subscribed");

    send(
        &mut owner,
        json!({
            "action": "publish_event",
            "source_address": sol_1_addr,
            "target_address": null,
            "event_type": "world_event",
            "payload": {"msg": "hi"},
        }),
    )
    .await;
    let queued = recv_json(&mut owner).await;
    assert_eq!(queued["type"], "event_queued");

    let delivered = recv_until(&mut subscriber, Duration::from_secs(2), |v| v["type"] == "event_delivered").await;
    assert_eq!(delivered["target_address"], sol_2_addr);
    assert_eq!(delivered["source_address"], sol_1_addr);
    assert_eq!(delivered["event_type"], "world_event");
    assert!(delivered["control_tick_id"].as_u64().expect("control_tick_id") >= 1);
}

/// Spec E6: publishing 5001 broadcast events against a replay buffer of R=5000
/// leaves exactly the most recent 5000 in the buffer, in publication order, with the
/// oldest evicted -- verified the way a late joiner actually observes it, via the
/// `connection_established` replay snapshot on a fresh connection.
#[tokio::test]
async fn e6_replay_buffer_keeps_the_most_recent_5000_events_in_order() {
    let mut config = Config::for_tests();
    config.replay_buffer_size = 5000;
    config.router_capacity = 6000;
    config.outbound_queue_size = 6000;

    let (oasis, url) = spawn_server(config).await;

    let mut owner = connect(&url).await;
    let _ = recv_json(&mut owner).await; // connection_established

    send(&mut owner, register_frame("sol_1")).await;
    let sol_1 = recv_json(&mut owner).await;
    let sol_1_addr = sol_1["address"].as_str().expect("registered address").to_string();

    send(&mut owner, register_frame("sol_2")).await;
    let _ = recv_json(&mut owner).await;

    for seq in 0..5001u32 {
        send(
            &mut owner,
            json!({
                "action": "publish_event",
                "source_address": sol_1_addr,
                "target_address": null,
                "event_type": "world_event",
                "payload": {"seq": seq},
            }),
        )
        .await;
    }

    for _ in 0..200 {
        if oasis.gateway_state.replay.snapshot().len() >= 5000 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut late_joiner = connect(&url).await;
    let established = recv_json(&mut late_joiner).await;
    assert_eq!(established["type"], "connection_established");
    let replay = established["replay"].as_array().expect("replay array");
    assert_eq!(replay.len(), 5000);

    let seqs: Vec<u64> = replay.iter().map(|e| e["payload"]["seq"].as_u64().expect("seq")).collect();
    assert_eq!(seqs[0], 1, "the oldest event (seq 0) must have been evicted");
    assert_eq!(*seqs.last().unwrap(), 5000);
    for pair in seqs.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "replayed events must stay in publication order");
    }
}
