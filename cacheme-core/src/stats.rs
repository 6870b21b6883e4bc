use std::sync::atomic::{AtomicU64, Ordering};

/// Per-policy counters for monitoring how calls move through the pipeline.
///
/// Every call lands in exactly one bucket:
///
/// - **hit**: the stored value was returned
/// - **miss**: nothing was stored, the computation ran
/// - **stale**: the key was pending deletion, the computation ran
/// - **skip**: the skip predicate bypassed the cache entirely
///
/// All counters use `Relaxed` atomics; they are monitoring data, not
/// synchronization.
///
/// # Examples
///
/// ```
/// use cacheme_core::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
/// stats.record_stale();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.recomputes(), 2);
/// assert_eq!(stats.total_accesses(), 4);
/// assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    skips: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a read that found its key in the pending-delete set.
    #[inline]
    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skip(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn skips(&self) -> u64 {
        self.skips.load(Ordering::Relaxed)
    }

    /// Number of times the computation ran because of a miss or a stale key.
    #[inline]
    pub fn recomputes(&self) -> u64 {
        self.misses() + self.stale()
    }

    /// Calls that went through the cache (skips excluded).
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.recomputes()
    }

    /// Fraction of cache accesses served from the store. `0.0` with no accesses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stale.store(0, Ordering::Relaxed);
        self.skips.store(0, Ordering::Relaxed);
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            stale: AtomicU64::new(self.stale()),
            skips: AtomicU64::new(self.skips()),
        }
    }
}
