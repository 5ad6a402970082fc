//! Running counters and a size-bucketed histogram for a [`crate::PersistentCache`].
//!
//! Two read-only views are exposed over the same fields, per the pimpl/back-pointer
//! note in spec.md §9: [`StatsRef`] borrows the live state held by the cache, while
//! [`StatsSnapshot`] is an owned, `Clone`-able copy callers can hold onto after the
//! cache has moved on.

/// Number of bins in the size histogram (decade-log scale).
pub const HISTOGRAM_BINS: usize = 74;

/// Which run (hit or miss streak) is currently extending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Fresh,
    LastWasHit,
    LastWasMiss,
}

/// Bucket a byte length into one of [`HISTOGRAM_BINS`] decade-log bins.
///
/// Bin 0 covers `1..=9`. Bins `1..=9` cover the decade `10..=99` split by leading
/// digit, bins `10..=18` cover `100..=999`, and so on through bins `64..=72`
/// covering `900_000_000..=999_999_999`. Bin 73 is the catch-all for `>= 10^9`.
pub fn bucket_for(size: u64) -> usize {
    if size < 10 {
        return 0;
    }
    if size >= 1_000_000_000 {
        return HISTOGRAM_BINS - 1;
    }
    let mut decade = 1u32;
    let mut pow = 10u64;
    while size >= pow * 10 {
        pow *= 10;
        decade += 1;
    }
    let digit = (size / pow) as usize; // 1..=9
    1 + 9 * (decade as usize - 1) + (digit - 1)
}

/// Inclusive `(low, high)` byte-length bounds for histogram bin `idx`.
pub fn bucket_bounds(idx: usize) -> (u64, u64) {
    assert!(idx < HISTOGRAM_BINS, "bin index out of range");
    if idx == 0 {
        return (1, 9);
    }
    if idx == HISTOGRAM_BINS - 1 {
        return (1_000_000_000, u64::MAX);
    }
    let decade = (idx - 1) / 9 + 1;
    let pos_in_decade = (idx - 1) % 9;
    let digit = pos_in_decade as u64 + 1;
    let pow = 10u64.pow(decade as u32);
    (digit * pow, (digit + 1) * pow - 1)
}

/// Mutable counter/histogram state owned by a cache instance.
#[derive(Debug, Clone)]
pub struct Stats {
    pub num_entries: u64,
    pub cache_size: u64,
    pub max_cache_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub ttl_evictions: u64,
    pub lru_evictions: u64,
    pub hits_since_last_miss: u64,
    pub misses_since_last_hit: u64,
    pub longest_hit_run: u64,
    pub longest_miss_run: u64,
    pub most_recent_hit_time: i64,
    pub most_recent_miss_time: i64,
    pub longest_hit_run_time: i64,
    pub longest_miss_run_time: i64,
    histogram: [u32; HISTOGRAM_BINS],
    run_state: RunState,
}

impl Stats {
    pub fn new(max_cache_size: u64) -> Self {
        Self {
            num_entries: 0,
            cache_size: 0,
            max_cache_size,
            hits: 0,
            misses: 0,
            ttl_evictions: 0,
            lru_evictions: 0,
            hits_since_last_miss: 0,
            misses_since_last_hit: 0,
            longest_hit_run: 0,
            longest_miss_run: 0,
            most_recent_hit_time: 0,
            most_recent_miss_time: 0,
            longest_hit_run_time: 0,
            longest_miss_run_time: 0,
            histogram: [0; HISTOGRAM_BINS],
            run_state: RunState::Fresh,
        }
    }

    pub fn record_hit(&mut self, now: i64) {
        self.hits += 1;
        self.most_recent_hit_time = now;
        match self.run_state {
            RunState::LastWasHit => {
                self.hits_since_last_miss += 1;
            }
            _ => {
                self.run_state = RunState::LastWasHit;
                self.hits_since_last_miss = 1;
            }
        }
        self.misses_since_last_hit = 0;
        if self.hits_since_last_miss > self.longest_hit_run {
            self.longest_hit_run = self.hits_since_last_miss;
            self.longest_hit_run_time = now;
        }
    }

    pub fn record_miss(&mut self, now: i64) {
        self.misses += 1;
        self.most_recent_miss_time = now;
        match self.run_state {
            RunState::LastWasMiss => {
                self.misses_since_last_hit += 1;
            }
            _ => {
                self.run_state = RunState::LastWasMiss;
                self.misses_since_last_hit = 1;
            }
        }
        self.hits_since_last_miss = 0;
        if self.misses_since_last_hit > self.longest_miss_run {
            self.longest_miss_run = self.misses_since_last_hit;
            self.longest_miss_run_time = now;
        }
    }

    /// Move `size` from one histogram bin to another after a resize, remove, or insert.
    pub fn size_changed(&mut self, old: Option<u64>, new: Option<u64>) {
        if let Some(old) = old {
            let bin = bucket_for(old);
            self.histogram[bin] = self.histogram[bin].saturating_sub(1);
        }
        if let Some(new) = new {
            let bin = bucket_for(new);
            self.histogram[bin] += 1;
        }
    }

    pub fn histogram(&self) -> &[u32; HISTOGRAM_BINS] {
        &self.histogram
    }

    /// Reset run/time counters. `num_entries`, `cache_size`, `max_cache_size`, and
    /// the histogram are structural and are left untouched.
    pub fn clear(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.ttl_evictions = 0;
        self.lru_evictions = 0;
        self.hits_since_last_miss = 0;
        self.misses_since_last_hit = 0;
        self.longest_hit_run = 0;
        self.longest_miss_run = 0;
        self.most_recent_hit_time = 0;
        self.most_recent_miss_time = 0;
        self.longest_hit_run_time = 0;
        self.longest_miss_run_time = 0;
        self.run_state = RunState::Fresh;
    }

    pub fn as_ref(&self) -> StatsRef<'_> {
        StatsRef(self)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            num_entries: self.num_entries,
            cache_size: self.cache_size,
            max_cache_size: self.max_cache_size,
            hits: self.hits,
            misses: self.misses,
            ttl_evictions: self.ttl_evictions,
            lru_evictions: self.lru_evictions,
            hits_since_last_miss: self.hits_since_last_miss,
            misses_since_last_hit: self.misses_since_last_hit,
            longest_hit_run: self.longest_hit_run,
            longest_miss_run: self.longest_miss_run,
            histogram: self.histogram,
        }
    }
}

/// A borrowed, always-live view over a cache's stats.
#[derive(Clone, Copy)]
pub struct StatsRef<'a>(&'a Stats);

impl<'a> StatsRef<'a> {
    pub fn num_entries(&self) -> u64 {
        self.0.num_entries
    }
    pub fn cache_size(&self) -> u64 {
        self.0.cache_size
    }
    pub fn hits(&self) -> u64 {
        self.0.hits
    }
    pub fn misses(&self) -> u64 {
        self.0.misses
    }
    pub fn histogram(&self) -> &'a [u32; HISTOGRAM_BINS] {
        self.0.histogram()
    }
}

/// An owned, point-in-time copy of a cache's stats.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub num_entries: u64,
    pub cache_size: u64,
    pub max_cache_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub ttl_evictions: u64,
    pub lru_evictions: u64,
    pub hits_since_last_miss: u64,
    pub misses_since_last_hit: u64,
    pub longest_hit_run: u64,
    pub longest_miss_run: u64,
    pub histogram: [u32; HISTOGRAM_BINS],
}
