use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dutils::wait_token::WaitToken;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::registry::{InstanceStatus, Registry};
use crate::router::{DeliveredEvent, Router};

#[derive(Clone, Debug, Default, Serialize)]
pub struct TickMetrics {
    pub tick_number: u64,
    pub instances_advanced: u64,
    pub instances_failed: u64,
    pub instances_paused_this_tick: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub last_tick_duration_ms: u64,
    /// Address of every instance that failed this tick, mapped to the engine's
    /// error or "exceeded soft deadline" (spec section 4.4).
    pub errors: BTreeMap<Address, String>,
}

/// Published on `paused_tx` (and logged) the tick an instance crosses the
/// consecutive-failure threshold (spec section 7).
#[derive(Clone, Debug, Serialize)]
pub struct InstancePausedEvent {
    pub address: Address,
    pub reason: String,
    pub control_tick_id: u64,
}

/// Drives the control-tick loop (spec section 5): every `period_ms`, snapshot the
/// registry, advance every running instance by `interval_ticks` local ticks, drain
/// the router, and fan out delivered events. The teacher's retry-loop shape in
/// `event_sender.rs`/`block_loader.rs` is reused here as a fixed-period loop instead
/// of a drain-until-empty loop, since a control tick always has a concrete cadence.
pub struct Scheduler {
    registry: Arc<Registry>,
    router: Arc<Router>,
    interval_ticks: u64,
    period: Duration,
    parallel: bool,
    parallel_limit: usize,
    max_consecutive_failures: u32,
    engine_soft_deadline: Duration,
    outbound_tx: broadcast::Sender<DeliveredEvent>,
    metrics_tx: broadcast::Sender<TickMetrics>,
    paused_tx: broadcast::Sender<InstancePausedEvent>,
    tick_number: std::sync::atomic::AtomicU64,
    last_dropped_total: std::sync::atomic::AtomicU64,
    last_metrics: parking_lot::Mutex<TickMetrics>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        router: Arc<Router>,
        interval_ticks: u64,
        period_ms: u64,
        parallel: bool,
        parallel_limit: usize,
        max_consecutive_failures: u32,
        engine_soft_deadline_ms: u64,
        outbound_tx: broadcast::Sender<DeliveredEvent>,
        metrics_tx: broadcast::Sender<TickMetrics>,
        paused_tx: broadcast::Sender<InstancePausedEvent>,
    ) -> Self {
        Self {
            registry,
            router,
            interval_ticks: interval_ticks.max(1),
            period: Duration::from_millis(period_ms.max(1)),
            parallel,
            parallel_limit: parallel_limit.max(1),
            max_consecutive_failures: max_consecutive_failures.max(1),
            engine_soft_deadline: Duration::from_millis(engine_soft_deadline_ms.max(1)),
            outbound_tx,
            metrics_tx,
            paused_tx,
            tick_number: std::sync::atomic::AtomicU64::new(0),
            last_dropped_total: std::sync::atomic::AtomicU64::new(0),
            last_metrics: parking_lot::Mutex::new(TickMetrics::default()),
        }
    }

    /// Runs until `token` is cancelled, then performs one final drain (spec section
    /// 10.4 shutdown sequencing) before returning.
    pub async fn run(&self, token: WaitToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let metrics = self.run_one_tick().await;
                    debug!(?metrics, "control tick complete");
                }
                _ = token.cancelled() => {
                    info!("scheduler received shutdown signal, running final drain");
                    let metrics = self.run_one_tick().await;
                    info!(?metrics, "final drain complete");
                    break;
                }
            }
        }
        Ok(())
    }

    /// One control tick: snapshot, advance, drain, deliver. Exposed directly for
    /// tests and for the admin `force_tick` escape hatch (spec section 6.4).
    pub async fn run_one_tick(&self) -> TickMetrics {
        let started = tokio::time::Instant::now();
        let tick_number = self.tick_number.fetch_add(1, std::sync::atomic::Ordering::AcqRel) + 1;

        // Registry is read-only for the duration of snapshot+advance: the read guard
        // is dropped before `router.drain()` so we never hold it across router work,
        // which would otherwise risk a reader/writer deadlock against a concurrent
        // `register`/`unregister` under parking_lot's writer-preferring policy.
        let running: Vec<_> = {
            let guard = self.registry.read();
            guard
                .values()
                .filter(|i| i.status() == InstanceStatus::Running)
                .cloned()
                .collect()
        };

        let result = if self.parallel { self.advance_parallel(&running).await } else { self.advance_sequential(&running).await };

        for (address, reason) in &result.paused_instances {
            warn!(%address, reason = %reason, "instance_paused");
            let _ = self.paused_tx.send(InstancePausedEvent {
                address: *address,
                reason: reason.clone(),
                control_tick_id: tick_number,
            });
        }

        let known_addresses: Vec<crate::address::Address> = self.registry.read().keys().cloned().collect();
        let dropped_before = self.last_dropped_total.load(std::sync::atomic::Ordering::Acquire);
        let delivered = self.router.drain(tick_number, &known_addresses);
        let events_delivered = delivered.len() as u64;
        let dropped_after = self.router.metrics().dropped_total;
        let events_dropped = dropped_after.saturating_sub(dropped_before);
        self.last_dropped_total.store(dropped_after, std::sync::atomic::Ordering::Release);
        for event in delivered {
            // No active subscribers is routine (spec section 6.5); broadcast's
            // `send` only errors when the receiver count is zero.
            let _ = self.outbound_tx.send(event);
        }

        let metrics = TickMetrics {
            tick_number,
            instances_advanced: result.advanced,
            instances_failed: result.failed,
            instances_paused_this_tick: result.paused,
            events_delivered,
            events_dropped,
            last_tick_duration_ms: started.elapsed().as_millis() as u64,
            errors: result.errors,
        };
        *self.last_metrics.lock() = metrics.clone();
        let _ = self.metrics_tx.send(metrics.clone());
        metrics
    }

    /// Last completed tick's metrics, for the `admin_stats` aggregate (spec
    /// section 10.3). `TickMetrics::default()` before the first tick runs.
    pub fn last_metrics(&self) -> TickMetrics {
        self.last_metrics.lock().clone()
    }

    async fn advance_sequential(&self, running: &[Arc<crate::registry::GameInstance>]) -> AdvanceResult {
        let mut result = AdvanceResult::default();
        for instance in running {
            result.absorb(self.advance_one(instance).await);
        }
        result
    }

    async fn advance_parallel(&self, running: &[Arc<crate::registry::GameInstance>]) -> AdvanceResult {
        let mut result = AdvanceResult::default();
        let mut chunks = running.chunks(self.parallel_limit);
        while let Some(chunk) = chunks.next() {
            let mut set = JoinSet::new();
            for instance in chunk {
                let instance = instance.clone();
                let interval_ticks = self.interval_ticks;
                let deadline = self.engine_soft_deadline;
                let max_failures = self.max_consecutive_failures;
                set.spawn(async move { advance_with_deadline(instance, interval_ticks, deadline, max_failures).await });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) => result.absorb(outcome),
                    Err(join_err) => {
                        error!(error = %join_err, "instance advance task panicked");
                        result.failed += 1;
                    }
                }
            }
        }
        result
    }

    async fn advance_one(&self, instance: &Arc<crate::registry::GameInstance>) -> AdvanceOutcome {
        advance_with_deadline(instance.clone(), self.interval_ticks, self.engine_soft_deadline, self.max_consecutive_failures).await
    }

    pub fn current_tick(&self) -> u64 {
        self.tick_number.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }
}

enum AdvanceOutcome {
    Ok,
    Failed { address: Address, message: String, paused: bool },
}

/// Per-tick tally built up across `advance_sequential`/`advance_parallel`.
/// `paused_instances` carries the address and pause reason of every instance that
/// crossed the failure threshold this tick, for `run_one_tick` to log and publish
/// once it knows the current `control_tick_id`.
#[derive(Default)]
struct AdvanceResult {
    advanced: u64,
    failed: u64,
    paused: u64,
    errors: BTreeMap<Address, String>,
    paused_instances: Vec<(Address, String)>,
}

impl AdvanceResult {
    fn absorb(&mut self, outcome: AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Ok => self.advanced += 1,
            AdvanceOutcome::Failed { address, message, paused } => {
                self.failed += 1;
                if paused {
                    self.paused += 1;
                    self.paused_instances.push((address, message.clone()));
                }
                self.errors.insert(address, message);
            }
        }
    }
}

async fn advance_with_deadline(
    instance: Arc<crate::registry::GameInstance>,
    interval_ticks: u64,
    soft_deadline: Duration,
    max_consecutive_failures: u32,
) -> AdvanceOutcome {
    let result = tokio::time::timeout(soft_deadline, instance.engine.advance(interval_ticks)).await;
    let message = match &result {
        Ok(Ok(())) => {
            instance.record_success(interval_ticks);
            return AdvanceOutcome::Ok;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_elapsed) => "engine advance exceeded soft deadline".to_string(),
    };
    warn!(address = %instance.address, error = %message, "engine advance failed");
    let paused = instance.record_failure(max_consecutive_failures);
    AdvanceOutcome::Failed { address: instance.address, message, paused }
}
