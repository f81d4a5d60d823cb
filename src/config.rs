use std::fmt;

use crate::utils::{load_opt_env, RedactedStr};

/// Runtime configuration for the orchestrator binary (spec section 6.2), resolved once
/// at startup from the environment the way the teacher's `Config::new` reads its
/// `load_opt_env!`-backed statics.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub admin_token: Option<String>,

    pub control_tick_interval_ticks: u64,
    pub control_tick_period_ms: u64,
    pub parallel_instances: bool,
    pub parallel_instances_limit: usize,
    pub shutdown_grace_ticks: u32,

    pub router_capacity: usize,
    pub replay_buffer_size: usize,
    pub outbound_queue_size: usize,

    pub handler_deadline_ms: u64,
    pub engine_soft_deadline_ms: u64,
    pub max_consecutive_engine_failures: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: load_opt_env!("OASIS_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8765".to_string()),
            admin_token: load_opt_env!("OASIS_ADMIN_TOKEN"),

            control_tick_interval_ticks: load_opt_env!("OASIS_CONTROL_TICK_INTERVAL_TICKS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            control_tick_period_ms: load_opt_env!("OASIS_CONTROL_TICK_PERIOD_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            parallel_instances: load_opt_env!("OASIS_PARALLEL_INSTANCES")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            parallel_instances_limit: load_opt_env!("OASIS_PARALLEL_INSTANCES_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)),
            shutdown_grace_ticks: 2,

            router_capacity: load_opt_env!("OASIS_ROUTER_CAPACITY").and_then(|v| v.parse().ok()).unwrap_or(10_000),
            replay_buffer_size: load_opt_env!("OASIS_REPLAY_BUFFER_SIZE").and_then(|v| v.parse().ok()).unwrap_or(5_000),
            outbound_queue_size: load_opt_env!("OASIS_OUTBOUND_QUEUE_SIZE").and_then(|v| v.parse().ok()).unwrap_or(1_024),

            handler_deadline_ms: load_opt_env!("OASIS_HANDLER_DEADLINE_MS").and_then(|v| v.parse().ok()).unwrap_or(5_000),
            engine_soft_deadline_ms: load_opt_env!("OASIS_ENGINE_SOFT_DEADLINE_MS").and_then(|v| v.parse().ok()).unwrap_or(200),
            max_consecutive_engine_failures: 3,
        }
    }

    /// Avoid requiring a real `.env` file in tests/examples.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            admin_token: None,
            control_tick_interval_ticks: 10,
            control_tick_period_ms: 20,
            parallel_instances: false,
            parallel_instances_limit: 4,
            shutdown_grace_ticks: 2,
            router_capacity: 64,
            replay_buffer_size: 16,
            outbound_queue_size: 32,
            handler_deadline_ms: 5_000,
            engine_soft_deadline_ms: 200,
            max_consecutive_engine_failures: 3,
        }
    }

    pub fn redacted(&self) -> RedactedConfig<'_> {
        RedactedConfig(self)
    }
}

pub struct RedactedConfig<'a>(&'a Config);

impl fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.0;
        f.debug_struct("Config")
            .field("bind_addr", &c.bind_addr)
            .field("admin_token", &c.admin_token.as_deref().map(RedactedStr))
            .field("control_tick_interval_ticks", &c.control_tick_interval_ticks)
            .field("control_tick_period_ms", &c.control_tick_period_ms)
            .field("parallel_instances", &c.parallel_instances)
            .field("parallel_instances_limit", &c.parallel_instances_limit)
            .field("router_capacity", &c.router_capacity)
            .field("replay_buffer_size", &c.replay_buffer_size)
            .field("outbound_queue_size", &c.outbound_queue_size)
            .finish()
    }
}
