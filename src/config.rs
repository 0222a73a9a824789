//! Engine configuration.
//!
//! Deliberately thin: the engine does not load its own configuration from
//! files or the environment (connection establishment/config loading is a
//! Non-goal, left to the caller) — it just accepts a typed struct of knobs
//! that govern the MVCC engine's own behavior.

use std::time::Duration;

/// Tunables for the transaction engine.
///
/// The two `Duration`s default to zero: fixed sleeps around lock waits and
/// between commit steps are a test-instrumentation aid, not something
/// correctness depends on, so production use should leave them at zero.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between successive attempts to acquire a contended lock, after
    /// the dependency has been recorded and before re-checking the lock
    /// table. Zero means retry immediately.
    pub lock_retry_delay: Duration,

    /// Upper bound on lock-acquire retries before giving up with
    /// `Error::LockBackendFailure`, independent of cycle detection. `None`
    /// means rely solely on dependency-cycle detection for forward
    /// progress.
    pub max_lock_retries: Option<u32>,

    /// Delay inserted between each step of commit/rollback. Exists purely
    /// to surface concurrency interleavings under test; defaults to zero.
    pub inter_step_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_retry_delay: Duration::ZERO,
            max_lock_retries: None,
            inter_step_delay: Duration::ZERO,
        }
    }
}

impl EngineConfig {
    /// Configuration tuned for deterministic interleaving tests: a small
    /// fixed lock-retry delay instead of zero, so concurrent transactions
    /// actually interleave rather than one winning the race every time.
    pub fn for_tests() -> Self {
        Self {
            lock_retry_delay: Duration::from_millis(10),
            max_lock_retries: Some(1000),
            inter_step_delay: Duration::ZERO,
        }
    }

    pub fn with_lock_retry_delay(mut self, d: Duration) -> Self {
        self.lock_retry_delay = d;
        self
    }

    pub fn with_max_lock_retries(mut self, n: u32) -> Self {
        self.max_lock_retries = Some(n);
        self
    }

    pub fn with_inter_step_delay(mut self, d: Duration) -> Self {
        self.inter_step_delay = d;
        self
    }
}
