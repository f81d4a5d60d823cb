pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod player;
pub mod registry;
pub mod router;
pub mod scheduler;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use dutils::wait_token::WaitToken;
use tokio::sync::broadcast;
use tracing::info;

use config::Config;
use gateway::GatewayState;
use player::PlayerRouter;
use registry::Registry;
use router::Router as EventRouter;
use scheduler::Scheduler;

/// Wires the five core components together (spec section 2 "Components"): the
/// registry, event router, control-tick scheduler, player router and gateway state
/// all share the same `Arc`s, the way the teacher's `Server` owns one `Arc<DB>` and
/// hands clones to every worker thread.
pub struct Oasis {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub event_router: Arc<EventRouter>,
    pub player_router: Arc<PlayerRouter>,
    pub scheduler: Arc<Scheduler>,
    pub gateway_state: GatewayState,
    pub token: WaitToken,
}

impl Oasis {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let event_router = Arc::new(EventRouter::new(config.router_capacity));
        let player_router = Arc::new(PlayerRouter::new(registry.clone(), event_router.clone()));
        let (outbound_tx, _rx) = broadcast::channel(config.outbound_queue_size.max(16));
        let (metrics_tx, _metrics_rx) = broadcast::channel(64);
        let (paused_tx, _paused_rx) = broadcast::channel(64);

        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            event_router.clone(),
            config.control_tick_interval_ticks,
            config.control_tick_period_ms,
            config.parallel_instances,
            config.parallel_instances_limit,
            config.max_consecutive_engine_failures,
            config.engine_soft_deadline_ms,
            outbound_tx.clone(),
            metrics_tx.clone(),
            paused_tx.clone(),
        ));

        let gateway_state = GatewayState {
            registry: registry.clone(),
            router: event_router.clone(),
            player_router: player_router.clone(),
            scheduler: scheduler.clone(),
            sessions: Arc::new(gateway::session::SessionTable::new()),
            replay: Arc::new(gateway::replay::ReplayBuffer::new(config.replay_buffer_size)),
            outbound_subscribe: outbound_tx,
            metrics_subscribe: metrics_tx,
            paused_subscribe: paused_tx,
            handler_deadline: Duration::from_millis(config.handler_deadline_ms),
            outbound_queue_size: config.outbound_queue_size,
            admin_token: config.admin_token.clone(),
        };

        Self { config, registry, event_router, player_router, scheduler, gateway_state, token: WaitToken::default() }
    }

    /// Runs the control-tick scheduler until `self.token` is cancelled, also
    /// feeding delivered broadcasts into the gateway's replay buffer so late
    /// joiners observe the same history live sessions saw (spec section 4.6).
    pub async fn run_scheduler(&self) -> anyhow::Result<()> {
        let mut replay_feed = self.gateway_state.outbound_subscribe.subscribe();
        let replay = self.gateway_state.replay.clone();
        let token = self.token.clone();
        let feed_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = replay_feed.recv() => {
                        match event {
                            Ok(event) => replay.record(event),
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        self.scheduler.run(self.token.clone()).await?;
        feed_task.abort();
        info!("scheduler loop exited");
        Ok(())
    }
}
