//! Per-engine atomic counters (spec §5 "Metrics"): monotonic, lock-free,
//! readable at any time without quiescence.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct EngineMetrics {
    num_cat_evals: AtomicU64,
    num_bitmask_checks: AtomicU64,
    num_bitmask_matches: AtomicU64,
    num_mask_array_lookups: AtomicU64,
}

/// Point-in-time snapshot of [`EngineMetrics`], safe to hand to a caller
/// without holding any lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub num_cat_evals: u64,
    pub num_bitmask_checks: u64,
    pub num_bitmask_matches: u64,
    pub num_mask_array_lookups: u64,
}

impl EngineMetrics {
    pub(crate) fn add_cat_evals(&self, n: u64) {
        self.num_cat_evals.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_bitmask_check(&self) {
        self.num_bitmask_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_bitmask_match(&self) {
        self.num_bitmask_matches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_mask_array_lookup(&self) {
        self.num_mask_array_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            num_cat_evals: self.num_cat_evals.load(Ordering::Relaxed),
            num_bitmask_checks: self.num_bitmask_checks.load(Ordering::Relaxed),
            num_bitmask_matches: self.num_bitmask_matches.load(Ordering::Relaxed),
            num_mask_array_lookups: self.num_mask_array_lookups.load(Ordering::Relaxed),
        }
    }
}
