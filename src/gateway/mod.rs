pub mod dispatch;
pub mod protocol;
pub mod replay;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router as AxumRouter;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::player::PlayerRouter;
use crate::registry::Registry;
use crate::router::{DeliveredEvent, Router as EventRouter};
use crate::scheduler::{InstancePausedEvent, Scheduler, TickMetrics};
use protocol::{OutboundBody, OutboundEnvelope, ParseOutcome};
use replay::ReplayBuffer;
use session::{EventFilter, Role, SessionHandle, SessionTable};

/// Shared state behind every gateway connection: the three core components plus
/// the session table and replay ring (spec section 4.6). Cheap to clone -- every
/// field is an `Arc`.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<Registry>,
    pub router: Arc<EventRouter>,
    pub player_router: Arc<PlayerRouter>,
    pub scheduler: Arc<Scheduler>,
    pub sessions: Arc<SessionTable>,
    pub replay: Arc<ReplayBuffer>,
    pub outbound_subscribe: tokio::sync::broadcast::Sender<DeliveredEvent>,
    pub metrics_subscribe: tokio::sync::broadcast::Sender<TickMetrics>,
    pub paused_subscribe: tokio::sync::broadcast::Sender<InstancePausedEvent>,
    pub handler_deadline: Duration,
    pub outbound_queue_size: usize,
    pub admin_token: Option<String>,
}

pub fn router(state: GatewayState) -> AxumRouter {
    AxumRouter::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Resolves a connection's role from its handshake. The core treats this mapping
/// as an opaque external decision (spec section 4.6); here it is a minimal
/// token-equality check against `admin_token`, with everything else anonymous.
fn resolve_role(admin_token: &Option<String>, presented_token: Option<&str>) -> Role {
    match (admin_token, presented_token) {
        (Some(expected), Some(got)) if expected == got => Role::Admin,
        (_, Some(_)) => Role::Authenticated,
        _ => Role::Anonymous,
    }
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let session_id: Uuid = Uuid::new_v4();
    let role = resolve_role(&state.admin_token, None);
    let (outbound_tx, outbound_rx) = mpsc::channel(state.outbound_queue_size);

    let handle = Arc::new(SessionHandle {
        session_id,
        role,
        outbound: outbound_tx,
        filter: parking_lot::RwLock::new(EventFilter::default()),
        owned_instances: parking_lot::RwLock::new(Default::default()),
    });
    state.sessions.insert(handle.clone());

    let established = OutboundEnvelope::new(
        None,
        OutboundBody::ConnectionEstablished { session_id, replay: state.replay.snapshot() },
    );
    if handle.try_deliver(established).is_err() {
        state.sessions.remove(session_id);
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_task = tokio::spawn(async move { write_loop(&mut ws_tx, outbound_rx).await });

    let mut broadcast_rx = state.outbound_subscribe.subscribe();
    let fanout_handle = handle.clone();
    let fanout_task = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(event) => {
                    if fanout_handle.filter.read().matches(&event.event_type)
                        && fanout_handle.try_deliver(OutboundEnvelope::new(None, OutboundBody::EventDelivered(event))).is_err()
                    {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut metrics_rx = state.metrics_subscribe.subscribe();
    let metrics_handle = handle.clone();
    let metrics_fanout_task = tokio::spawn(async move {
        loop {
            match metrics_rx.recv().await {
                Ok(metrics) => {
                    if metrics_handle.filter.read().matches("control_tick_complete")
                        && metrics_handle
                            .try_deliver(OutboundEnvelope::new(None, OutboundBody::ControlTickComplete(metrics)))
                            .is_err()
                    {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut paused_rx = state.paused_subscribe.subscribe();
    let paused_handle = handle.clone();
    let paused_fanout_task = tokio::spawn(async move {
        loop {
            match paused_rx.recv().await {
                Ok(event) => {
                    if paused_handle.filter.read().matches("instance_paused")
                        && paused_handle.try_deliver(OutboundEnvelope::new(None, OutboundBody::InstancePaused(event))).is_err()
                    {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let raw = match msg {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
        };

        let reply = match protocol::parse_inbound(&raw) {
            ParseOutcome::Frame(frame) => dispatch::dispatch(&state, &handle, frame).await,
            ParseOutcome::UnknownAction(request_id) => OutboundEnvelope::unknown_action(request_id),
            ParseOutcome::Malformed(request_id, reason) => OutboundEnvelope::error(request_id, "invalid_input", reason),
        };

        if handle.try_deliver(reply).is_err() {
            warn!(%session_id, "outbound queue full, disconnecting as slow_consumer");
            break;
        }
    }

    fanout_task.abort();
    metrics_fanout_task.abort();
    paused_fanout_task.abort();
    cleanup_session(&state, session_id).await;
    writer_task.abort();
}

async fn write_loop(ws_tx: &mut SplitSink<WebSocket, Message>, mut outbound_rx: mpsc::Receiver<OutboundEnvelope>) {
    while let Some(envelope) = outbound_rx.recv().await {
        let text = match serde_json::to_string(&envelope) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound envelope");
                continue;
            }
        };
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

async fn cleanup_session(state: &GatewayState, session_id: Uuid) {
    if let Some(handle) = state.sessions.remove(session_id) {
        let owned: Vec<_> = handle.owned_instances.read().iter().cloned().collect();
        for address in owned {
            if let Err(e) = state.registry.unregister(address, session_id, false) {
                warn!(%address, error = %e, "failed to unregister owned instance on disconnect");
            }
        }
        info!(%session_id, "session disconnected");
    }
}
