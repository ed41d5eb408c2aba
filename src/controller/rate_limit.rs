//! Per-cluster reconciliation rate limiting.
//!
//! Watch storms (status-only churn, pod flapping) can re-enqueue a cluster
//! far faster than reconciliation is useful. A token bucket caps the number
//! of observed-state reconciliations per cluster per minute, combined with
//! an exponential backoff (5s to 30s) on repeated write conflicts.
//!
//! Reconciliations triggered by a spec generation change bypass the limiter
//! entirely: an urgent user edit (emergency scale-down) must never be
//! starved behind observed-state churn.

use std::collections::HashMap;
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::Mutex;

/// Default cap on observed-state reconciliations per cluster per minute.
pub const DEFAULT_MAX_PER_MINUTE: u32 = 12;

/// Initial conflict backoff.
const CONFLICT_BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Conflict backoff ceiling.
const CONFLICT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Decision for a reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// Run the reconciliation.
    Proceed,
    /// Over budget; requeue after the window frees up.
    Throttled { retry_after: Duration },
}

#[derive(Debug, Default)]
struct Bucket {
    window_start: Option<Timestamp>,
    count: u32,
    consecutive_conflicts: u32,
}

/// Token bucket + conflict backoff, keyed by cluster ("namespace/name").
pub struct ReconcileRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_per_minute: u32,
}

impl Default for ReconcileRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_MINUTE)
    }
}

impl ReconcileRateLimiter {
    /// Create a limiter with a custom per-minute cap.
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_per_minute,
        }
    }

    /// Check whether a reconciliation may run now.
    pub async fn check(&self, key: &str, generation_changed: bool) -> RateDecision {
        self.check_at(key, generation_changed, Timestamp::now()).await
    }

    /// Clock-injected variant, also used directly by tests.
    pub async fn check_at(
        &self,
        key: &str,
        generation_changed: bool,
        now: Timestamp,
    ) -> RateDecision {
        // Spec edits bypass the limiter.
        if generation_changed {
            return RateDecision::Proceed;
        }

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_default();

        let window_age = bucket
            .window_start
            .map(|start| now.as_second() - start.as_second())
            .unwrap_or(i64::MAX);

        if window_age >= 60 {
            bucket.window_start = Some(now);
            bucket.count = 1;
            return RateDecision::Proceed;
        }

        if bucket.count >= self.max_per_minute {
            let retry_after = Duration::from_secs((60 - window_age).max(1) as u64);
            return RateDecision::Throttled { retry_after };
        }

        bucket.count += 1;
        RateDecision::Proceed
    }

    /// Record a write conflict; returns the backoff to apply before the next
    /// attempt (5s doubling to 30s).
    pub async fn record_conflict(&self, key: &str) -> Duration {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_default();
        bucket.consecutive_conflicts += 1;

        let exp = bucket.consecutive_conflicts.saturating_sub(1).min(8);
        let backoff = CONFLICT_BACKOFF_BASE.saturating_mul(1 << exp);
        backoff.min(CONFLICT_BACKOFF_MAX)
    }

    /// Record a successful reconciliation, clearing the conflict streak.
    pub async fn record_success(&self, key: &str) {
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(key) {
            bucket.consecutive_conflicts = 0;
        }
    }

    /// Drop bookkeeping for a deleted cluster.
    pub async fn forget(&self, key: &str) {
        self.buckets.lock().await.remove(key);
    }
}
