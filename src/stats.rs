use serde::Serialize;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

/// Counters shared by resolver calls and the batch processor.
#[derive(Debug, Default)]
pub struct ProviderStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    enqueued: AtomicU64,
    coalesced: AtomicU64,
    batches: AtomicU64,
    lookup_failures: AtomicU64,
    not_found: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`ProviderStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Ids pushed onto the queue.
    pub enqueued: u64,
    /// Misses that joined an already pending request instead of enqueueing.
    pub coalesced: u64,
    /// Lookup calls issued, one per batch.
    pub batches: u64,
    pub lookup_failures: u64,
    pub not_found: u64,
    pub timeouts: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl ProviderStats {
            $(
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    record_cache_hit => cache_hits,
    record_cache_miss => cache_misses,
    record_enqueued => enqueued,
    record_coalesced => coalesced,
    record_batch => batches,
    record_lookup_failure => lookup_failures,
    record_timeout => timeouts,
}

impl ProviderStats {
    pub(crate) fn record_not_found(&self, count: usize) {
        self.not_found.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
