use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

/// External collaborator contract (spec section 6.3). Per-instance simulation content
/// is out of scope; the core only ever calls `advance`/`describe` on a registered
/// engine handle.
#[async_trait]
pub trait TickEngine: Send + Sync {
    async fn advance(&self, n_local_ticks: u64) -> anyhow::Result<()>;

    async fn describe(&self) -> HashMap<String, String>;
}

/// A content-free stand-in engine used by the scheduler's own tests and by the
/// integration harness under `tests/`. Never shipped behind a real registration in
/// the binary's normal startup path.
pub struct NullEngine {
    name: String,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl NullEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fail_every: None, calls: AtomicU64::new(0) }
    }

    /// Fails every `n`th call to `advance`, for exercising the scheduler's
    /// consecutive-failure pause policy.
    pub fn failing_every(name: impl Into<String>, n: u64) -> Self {
        Self { name: name.into(), fail_every: Some(n), calls: AtomicU64::new(0) }
    }
}

#[async_trait]
impl TickEngine for NullEngine {
    async fn advance(&self, _n_local_ticks: u64) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(n) = self.fail_every {
            if n != 0 && call % n == 0 {
                anyhow::bail!("simulated engine failure on call {call}");
            }
        }
        Ok(())
    }

    async fn describe(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("name".to_string(), self.name.clone());
        m.insert("version".to_string(), "null-engine/1".to_string());
        m
    }
}
