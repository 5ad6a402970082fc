//! The persistent, ordered key-value store at the heart of the cache tier.
//!
//! See spec.md §4.D. Every public method locks a single intra-process mutex for
//! the duration of the call, including any registered event callbacks — this
//! satisfies the "single intra-process recursive mutex" requirement without an
//! actual reentrant lock, since no method here calls back into another public
//! method while holding the guard (see DESIGN.md).
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, ErrorKind, Result};
use crate::events::{CacheEvent, EventMask, Handler};
use crate::file_lock::FileLock;
use crate::stats::{Stats, StatsSnapshot};
use crate::storage::{self, Log, LogRecord, PersistedSettings, ReplayError};

/// Which secondary index an entry participates in besides the LRU index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardPolicy {
    LruOnly,
    LruTtl,
}

/// A stored value together with its opaque metadata side-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue {
    pub value: Vec<u8>,
    pub metadata: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    metadata: Vec<u8>,
    atime: i64,
    etime: i64,
}

impl Entry {
    fn size(&self) -> u64 {
        (self.value.len() + self.metadata.len()) as u64
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

struct EvictResult {
    fired: Vec<(CacheEvent, Vec<u8>)>,
    tombstones: Vec<LogRecord>,
}

struct Inner {
    dir: PathBuf,
    policy: DiscardPolicy,
    max_size: u64,
    main: HashMap<Vec<u8>, Entry>,
    lru_index: BTreeMap<(i64, Vec<u8>), ()>,
    ttl_index: BTreeMap<(i64, Vec<u8>), ()>,
    stats: Stats,
    last_atime: i64,
    log: Log,
    handlers: Vec<(EventMask, Handler)>,
    // Held for the lifetime of `Inner` to enforce single-writer access to `dir`;
    // never read again after `open_with_settings` acquires it.
    _lock: FileLock,
}

impl Inner {
    fn fire(&mut self, event: CacheEvent, key: &[u8]) {
        for (mask, handler) in self.handlers.iter_mut() {
            if mask.contains(event) {
                handler(event, key);
            }
        }
    }

    fn next_atime(&mut self, now: i64) -> i64 {
        let atime = if now <= self.last_atime { self.last_atime + 1 } else { now };
        self.last_atime = atime;
        atime
    }

    fn index_insert(&mut self, key: &[u8], atime: i64, etime: i64) {
        self.lru_index.insert((atime, key.to_vec()), ());
        if etime != 0 && self.policy == DiscardPolicy::LruTtl {
            self.ttl_index.insert((etime, key.to_vec()), ());
        }
    }

    fn index_remove(&mut self, key: &[u8], atime: i64, etime: i64) {
        self.lru_index.remove(&(atime, key.to_vec()));
        if etime != 0 {
            self.ttl_index.remove(&(etime, key.to_vec()));
        }
    }

    /// Insert or replace an entry, maintaining indexes and stats. Does not touch
    /// the log. Returns the previous size, if any.
    fn insert_entry(&mut self, key: Vec<u8>, value: Vec<u8>, metadata: Vec<u8>, atime: i64, etime: i64) -> Option<u64> {
        let old_size = if let Some(old) = self.main.get(&key).cloned() {
            self.index_remove(&key, old.atime, old.etime);
            Some(old.size())
        } else {
            None
        };
        let entry = Entry { value, metadata, atime, etime };
        let new_size = entry.size();
        self.index_insert(&key, atime, etime);
        self.main.insert(key, entry);
        if old_size.is_none() {
            self.stats.num_entries += 1;
        }
        self.stats.cache_size = self.stats.cache_size - old_size.unwrap_or(0) + new_size;
        self.stats.size_changed(old_size, Some(new_size));
        old_size
    }

    /// Remove an entry, maintaining indexes and stats. Does not touch the log.
    fn remove_entry(&mut self, key: &[u8]) -> Option<Entry> {
        let entry = self.main.remove(key)?;
        self.index_remove(key, entry.atime, entry.etime);
        self.stats.num_entries -= 1;
        self.stats.cache_size -= entry.size();
        self.stats.size_changed(Some(entry.size()), None);
        Some(entry)
    }

    /// Replay loaded records without reapplying log-write side effects.
    fn apply_replayed(&mut self, rec: LogRecord) {
        match rec {
            LogRecord::Put { key, value, metadata, atime, etime } => {
                if atime > self.last_atime {
                    self.last_atime = atime;
                }
                self.insert_entry(key, value, metadata, atime, etime);
            }
            LogRecord::Tombstone { key } => {
                self.remove_entry(&key);
            }
        }
    }

    /// Evict entries (TTL first under LRU+TTL, then LRU) until `cache_size <=
    /// target`, skipping `skip_key`. See spec.md §4.D's eviction algorithm.
    fn evict(&mut self, target: u64, skip_key: &[u8], now: i64) -> EvictResult {
        let mut need = self.stats.cache_size as i64 - target as i64;
        let mut fired = Vec::new();
        let mut tombstones = Vec::new();

        if self.policy == DiscardPolicy::LruTtl {
            let expired: Vec<Vec<u8>> = self
                .ttl_index
                .iter()
                .take_while(|((etime, _), _)| *etime <= now)
                .map(|((_, key), _)| key.clone())
                .filter(|key| key.as_slice() != skip_key)
                .collect();
            for key in expired {
                if let Some(entry) = self.remove_entry(&key) {
                    need -= entry.size() as i64;
                    self.stats.ttl_evictions += 1;
                    fired.push((CacheEvent::EvictTtl, key.clone()));
                    tombstones.push(LogRecord::Tombstone { key });
                }
            }
        }

        if need > 0 {
            let candidates: Vec<Vec<u8>> = self
                .lru_index
                .iter()
                .map(|((_, key), _)| key.clone())
                .filter(|key| key.as_slice() != skip_key)
                .collect();
            for key in candidates {
                if need <= 0 {
                    break;
                }
                if let Some(entry) = self.remove_entry(&key) {
                    need -= entry.size() as i64;
                    self.stats.lru_evictions += 1;
                    fired.push((CacheEvent::EvictLru, key.clone()));
                    tombstones.push(LogRecord::Tombstone { key });
                }
            }
        }

        EvictResult { fired, tombstones }
    }

    fn commit(&mut self, mut records: Vec<LogRecord>, evicted: EvictResult) -> Result<()> {
        records.extend(evicted.tombstones);
        if !records.is_empty() {
            storage::set_dirty(&self.dir)?;
            self.log.append_batch(&records)?;
            storage::clear_dirty(&self.dir)?;
        }
        for (event, key) in evicted.fired {
            self.fire(event, &key);
        }
        Ok(())
    }
}

/// The persistent, ordered key-value store. See spec.md §4.D.
pub struct PersistentCache {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache").finish_non_exhaustive()
    }
}

impl PersistentCache {
    /// Open (creating if needed) a cache at `path` with the given byte budget and
    /// eviction policy. Re-opening with different settings fails with
    /// [`ErrorKind::LogicError`] — use [`PersistentCache::resize`] instead.
    pub fn open(path: impl AsRef<Path>, max_size: u64, policy: DiscardPolicy) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::new(ErrorKind::InvalidArg, "max_size must be > 0"));
        }
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        if let Some(persisted) = storage::read_settings(&dir) {
            let policy_matches = persisted.policy_is_lru_ttl == (policy == DiscardPolicy::LruTtl);
            if persisted.max_size != max_size || !policy_matches {
                return Err(Error::new(
                    ErrorKind::LogicError,
                    "cache re-opened with different settings; use resize() instead",
                ));
            }
        } else {
            storage::write_settings(
                &dir,
                PersistedSettings { max_size, policy_is_lru_ttl: policy == DiscardPolicy::LruTtl },
            )?;
        }

        Self::open_with_settings(dir, max_size, policy)
    }

    /// Re-open an existing cache, inheriting its persisted size and policy.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        let Some(persisted) = storage::read_settings(&dir) else {
            return Err(Error::new(ErrorKind::NotFound, "no cache exists at this path"));
        };
        let policy = if persisted.policy_is_lru_ttl { DiscardPolicy::LruTtl } else { DiscardPolicy::LruOnly };
        Self::open_with_settings(dir, persisted.max_size, policy)
    }

    fn open_with_settings(dir: PathBuf, max_size: u64, policy: DiscardPolicy) -> Result<Self> {
        let mut lock = FileLock::new(&dir)?;
        if !lock.try_lock()? {
            return Err(Error::new(ErrorKind::AlreadyLocked, "cache directory is held by another process"));
        }

        let was_dirty = storage::is_dirty(&dir);
        let records = storage::replay(&dir.join(storage::LOG_FILE)).map_err(|ReplayError::Corrupt(msg)| {
            Error::new(ErrorKind::Corrupt, msg)
        })?;
        let log = Log::open(&dir)?;

        let mut inner = Inner {
            dir: dir.clone(),
            policy,
            max_size,
            main: HashMap::new(),
            lru_index: BTreeMap::new(),
            ttl_index: BTreeMap::new(),
            stats: Stats::new(max_size),
            last_atime: 0,
            log,
            handlers: Vec::new(),
            _lock: lock,
        };
        for rec in records {
            inner.apply_replayed(rec);
        }
        if was_dirty {
            tracing::warn!("cache at {} reopened with dirty flag set; indexes rebuilt by scrub", dir.display());
        }
        storage::clear_dirty(&dir)?;

        Ok(Self { inner: Mutex::new(inner) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<CacheValue>> {
        let now = now_ms();
        let mut inner = self.lock();
        let expired = inner
            .main
            .get(key)
            .is_some_and(|e| inner.policy == DiscardPolicy::LruTtl && e.etime != 0 && e.etime <= now);
        if expired {
            if inner.remove_entry(key).is_some() {
                inner.stats.ttl_evictions += 1;
                inner.commit(vec![], EvictResult { fired: vec![(CacheEvent::EvictTtl, key.to_vec())], tombstones: vec![LogRecord::Tombstone { key: key.to_vec() }] })?;
            }
            inner.stats.record_miss(now);
            inner.fire(CacheEvent::Miss, key);
            return Ok(None);
        }

        if let Some(entry) = inner.main.get(key).cloned() {
            let atime = inner.next_atime(now);
            inner.index_remove(key, entry.atime, entry.etime);
            inner.index_insert(key, atime, entry.etime);
            if let Some(e) = inner.main.get_mut(key) {
                e.atime = atime;
            }
            inner.stats.record_hit(now);
            inner.fire(CacheEvent::Get, key);
            Ok(Some(CacheValue { value: entry.value, metadata: entry.metadata }))
        } else {
            inner.stats.record_miss(now);
            inner.fire(CacheEvent::Miss, key);
            Ok(None)
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        let now = now_ms();
        let inner = self.lock();
        Ok(inner.main.get(key).is_some_and(|e| {
            !(inner.policy == DiscardPolicy::LruTtl && e.etime != 0 && e.etime <= now)
        }))
    }

    /// Store `value` (and optional `metadata`/`expiry`) under `key`. Returns
    /// `false` without changing the cache if the entry alone exceeds the byte
    /// budget.
    pub fn put(&self, key: &[u8], value: Vec<u8>, metadata: Vec<u8>, expiry: i64) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArg, "key must not be empty"));
        }
        let mut inner = self.lock();
        if expiry != 0 && inner.policy == DiscardPolicy::LruOnly {
            return Err(Error::new(ErrorKind::InvalidArg, "expiry set under LRU-only policy"));
        }
        let incoming_size = (value.len() + metadata.len()) as u64;
        if incoming_size > inner.max_size {
            return Ok(false);
        }
        let now = now_ms();
        let target = inner.max_size - incoming_size;
        let evicted = inner.evict(target, key, now);
        let atime = inner.next_atime(now);
        inner.insert_entry(key.to_vec(), value.clone(), metadata.clone(), atime, expiry);
        let rec = LogRecord::Put { key: key.to_vec(), value, metadata, atime, etime: expiry };
        inner.commit(vec![rec], evicted)?;
        inner.fire(CacheEvent::Put, key);
        Ok(true)
    }

    /// `loader` runs only on a miss, under the instance lock held for the
    /// entire probe-load-insert sequence, so two concurrent misses cannot both
    /// run the loader and race to overwrite each other's insert.
    pub fn get_or_put(
        &self,
        key: &[u8],
        loader: impl FnOnce() -> Result<(Vec<u8>, Vec<u8>, i64)>,
    ) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArg, "key must not be empty"));
        }
        let now = now_ms();
        let mut inner = self.lock();

        let expired = inner
            .main
            .get(key)
            .is_some_and(|e| inner.policy == DiscardPolicy::LruTtl && e.etime != 0 && e.etime <= now);
        if expired {
            if inner.remove_entry(key).is_some() {
                inner.stats.ttl_evictions += 1;
                inner.commit(
                    vec![],
                    EvictResult {
                        fired: vec![(CacheEvent::EvictTtl, key.to_vec())],
                        tombstones: vec![LogRecord::Tombstone { key: key.to_vec() }],
                    },
                )?;
            }
            inner.stats.record_miss(now);
            inner.fire(CacheEvent::Miss, key);
        } else if let Some(entry) = inner.main.get(key).cloned() {
            let atime = inner.next_atime(now);
            inner.index_remove(key, entry.atime, entry.etime);
            inner.index_insert(key, atime, entry.etime);
            if let Some(e) = inner.main.get_mut(key) {
                e.atime = atime;
            }
            inner.stats.record_hit(now);
            inner.fire(CacheEvent::Get, key);
            return Ok(entry.value);
        } else {
            inner.stats.record_miss(now);
            inner.fire(CacheEvent::Miss, key);
        }

        let (value, metadata, expiry) = loader()?;
        if expiry != 0 && inner.policy == DiscardPolicy::LruOnly {
            return Err(Error::new(ErrorKind::InvalidArg, "expiry set under LRU-only policy"));
        }
        let incoming_size = (value.len() + metadata.len()) as u64;
        if incoming_size > inner.max_size {
            return Ok(value);
        }
        let target = inner.max_size - incoming_size;
        let evicted = inner.evict(target, key, now);
        let atime = inner.next_atime(now);
        inner.insert_entry(key.to_vec(), value.clone(), metadata.clone(), atime, expiry);
        let rec = LogRecord::Put { key: key.to_vec(), value: value.clone(), metadata, atime, etime: expiry };
        inner.commit(vec![rec], evicted)?;
        inner.fire(CacheEvent::Put, key);
        Ok(value)
    }

    /// Replace an entry's metadata in place. Returns `false` if `key` is absent.
    pub fn put_metadata(&self, key: &[u8], metadata: Vec<u8>) -> Result<bool> {
        let mut inner = self.lock();
        let Some(old) = inner.main.get(key).cloned() else {
            return Ok(false);
        };
        let new_size = (old.value.len() + metadata.len()) as u64;
        if new_size > inner.max_size {
            return Ok(false);
        }
        let now = now_ms();
        let target = inner.max_size.saturating_sub(new_size);
        let evicted = inner.evict(target, key, now);
        inner.insert_entry(key.to_vec(), old.value.clone(), metadata.clone(), old.atime, old.etime);
        let rec = LogRecord::Put { key: key.to_vec(), value: old.value, metadata, atime: old.atime, etime: old.etime };
        inner.commit(vec![rec], evicted)?;
        Ok(true)
    }

    /// Remove and return an entry. A hit refreshes stats as a hit; a miss is a
    /// reported no-op.
    pub fn take(&self, key: &[u8]) -> Result<Option<CacheValue>> {
        let now = now_ms();
        let mut inner = self.lock();
        let Some(entry) = inner.remove_entry(key) else {
            return Ok(None);
        };
        inner.commit(vec![], EvictResult { fired: vec![], tombstones: vec![LogRecord::Tombstone { key: key.to_vec() }] })?;
        inner.stats.record_hit(now);
        inner.fire(CacheEvent::Get, key);
        Ok(Some(CacheValue { value: entry.value, metadata: entry.metadata }))
    }

    pub fn invalidate(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.remove_entry(key).is_some() {
            inner.commit(vec![], EvictResult { fired: vec![(CacheEvent::Invalidate, key.to_vec())], tombstones: vec![LogRecord::Tombstone { key: key.to_vec() }] })?;
        }
        Ok(())
    }

    pub fn invalidate_many(&self, keys: &[Vec<u8>]) -> Result<()> {
        let mut inner = self.lock();
        let mut fired = Vec::new();
        let mut tombstones = Vec::new();
        for key in keys {
            if inner.remove_entry(key).is_some() {
                fired.push((CacheEvent::Invalidate, key.clone()));
                tombstones.push(LogRecord::Tombstone { key: key.clone() });
            }
        }
        inner.commit(vec![], EvictResult { fired, tombstones })
    }

    pub fn invalidate_all(&self) -> Result<()> {
        let keys: Vec<Vec<u8>> = {
            let inner = self.lock();
            inner.main.keys().cloned().collect()
        };
        self.invalidate_many(&keys)
    }

    /// Set `atime = now`, `etime = expiry`. Returns `false` if `key` is absent.
    pub fn touch(&self, key: &[u8], expiry: i64) -> Result<bool> {
        let mut inner = self.lock();
        if expiry != 0 && inner.policy == DiscardPolicy::LruOnly {
            return Err(Error::new(ErrorKind::InvalidArg, "expiry set under LRU-only policy"));
        }
        let Some(old) = inner.main.get(key).cloned() else {
            return Ok(false);
        };
        let now = now_ms();
        let atime = inner.next_atime(now);
        inner.index_remove(key, old.atime, old.etime);
        inner.index_insert(key, atime, expiry);
        if let Some(e) = inner.main.get_mut(key) {
            e.atime = atime;
            e.etime = expiry;
        }
        let rec = LogRecord::Put { key: key.to_vec(), value: old.value, metadata: old.metadata, atime, etime: expiry };
        inner.commit(vec![rec], EvictResult { fired: vec![], tombstones: vec![] })?;
        inner.fire(CacheEvent::Touch, key);
        Ok(true)
    }

    pub fn size(&self) -> u64 {
        self.lock().stats.num_entries
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.lock().stats.cache_size
    }

    pub fn max_size_in_bytes(&self) -> u64 {
        self.lock().max_size
    }

    pub fn resize(&self, new_max: u64) -> Result<()> {
        if new_max == 0 {
            return Err(Error::new(ErrorKind::InvalidArg, "new_max must be > 0"));
        }
        let mut inner = self.lock();
        let now = now_ms();
        let evicted = inner.evict(new_max, b"", now);
        inner.commit(vec![], evicted)?;
        inner.max_size = new_max;
        inner.stats.max_cache_size = new_max;
        storage::write_settings(
            &inner.dir,
            PersistedSettings { max_size: new_max, policy_is_lru_ttl: inner.policy == DiscardPolicy::LruTtl },
        )?;
        Ok(())
    }

    /// Evict down to a transient target not exceeding `max_size_in_bytes()`,
    /// without changing the persisted byte budget.
    pub fn trim_to(&self, target_bytes: u64) -> Result<()> {
        let mut inner = self.lock();
        let now = now_ms();
        let evicted = inner.evict(target_bytes, b"", now);
        inner.commit(vec![], evicted)
    }

    /// Rebuild on-disk storage to reclaim space from tombstones. Returns bytes reclaimed.
    pub fn compact(&self) -> Result<u64> {
        let mut inner = self.lock();
        let records: Vec<LogRecord> = inner
            .main
            .iter()
            .map(|(key, entry)| LogRecord::Put {
                key: key.clone(),
                value: entry.value.clone(),
                metadata: entry.metadata.clone(),
                atime: entry.atime,
                etime: entry.etime,
            })
            .collect();
        let dir = inner.dir.clone();
        let reclaimed = inner.log.compact(&dir, &records)?;
        Ok(reclaimed)
    }

    pub fn clear_stats(&self) {
        self.lock().stats.clear();
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.lock().stats.snapshot()
    }

    /// Borrow the live stats view for the duration of `f`, per the
    /// pimpl/back-pointer design note in spec.md §9.
    pub fn with_stats<R>(&self, f: impl FnOnce(crate::stats::StatsRef<'_>) -> R) -> R {
        f(self.lock().stats.as_ref())
    }

    /// Register a synchronous callback for the events in `mask`. Multiple
    /// handlers may be registered; each fires inside the instance's critical
    /// section, so a handler must not call back into this cache.
    pub fn set_handler(&self, mask: EventMask, handler: Handler) {
        self.lock().handlers.push((mask, handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path, max: u64, policy: DiscardPolicy) -> PersistentCache {
        PersistentCache::open(dir, max, policy).unwrap()
    }

    #[test]
    fn basic_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1024 * 1024, DiscardPolicy::LruOnly);
        assert!(cache.put(b"k", b"v".to_vec(), vec![], 0).unwrap());
        assert_eq!(cache.get(b"k").unwrap().unwrap().value, b"v");
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.size_in_bytes(), 1);
    }

    #[test]
    fn get_or_put_loads_only_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
        let calls = std::sync::atomic::AtomicU32::new(0);

        let v1 = cache
            .get_or_put(b"k", || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok((b"loaded".to_vec(), vec![], 0))
            })
            .unwrap();
        let v2 = cache
            .get_or_put(b"k", || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok((b"should-not-run".to_vec(), vec![], 0))
            })
            .unwrap();

        assert_eq!(v1, b"loaded");
        assert_eq!(v2, b"loaded");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn get_or_put_serializes_concurrent_misses_to_a_single_loader_run() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(open(dir.path(), 1024, DiscardPolicy::LruOnly));
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_put(b"k", || {
                            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok((b"loaded".to_vec(), vec![], 0))
                        })
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), b"loaded");
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn lru_eviction_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 30, DiscardPolicy::LruOnly);
        assert!(cache.put(b"a", vec![0; 10], vec![], 0).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(cache.put(b"b", vec![0; 10], vec![], 0).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.get(b"a").unwrap(); // refresh a's atime so b becomes oldest
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(cache.put(b"c", vec![0; 10], vec![], 0).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(cache.put(b"d", vec![0; 5], vec![], 0).unwrap());

        assert!(!cache.contains_key(b"b").unwrap());
        assert!(cache.contains_key(b"a").unwrap());
        assert!(cache.contains_key(b"c").unwrap());
        assert!(cache.contains_key(b"d").unwrap());
        assert_eq!(cache.size_in_bytes(), 25);
    }

    #[test]
    fn ttl_eviction_preferred_over_lru() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 20, DiscardPolicy::LruTtl);
        let now = now_ms();
        assert!(cache.put(b"x", vec![0; 10], vec![], now + 500).unwrap());
        assert!(cache.put(b"y", vec![0; 10], vec![], 0).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(700));
        assert!(cache.put(b"z", vec![0; 10], vec![], 0).unwrap());

        assert!(!cache.contains_key(b"x").unwrap());
        assert!(cache.contains_key(b"y").unwrap());
        assert!(cache.contains_key(b"z").unwrap());
    }

    #[test]
    fn refuses_oversize_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 10, DiscardPolicy::LruOnly);
        assert!(!cache.put(b"k", b"0123456789AB".to_vec(), vec![], 0).unwrap());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn invalidate_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
        cache.put(b"k", b"v".to_vec(), vec![], 0).unwrap();
        cache.invalidate(b"k").unwrap();
        assert!(!cache.contains_key(b"k").unwrap());
    }

    #[test]
    fn take_deletes_and_reports_miss_as_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
        cache.put(b"k", b"v".to_vec(), vec![], 0).unwrap();
        let taken = cache.take(b"k").unwrap().unwrap();
        assert_eq!(taken.value, b"v");
        assert!(!cache.contains_key(b"k").unwrap());
        assert!(cache.get(b"k").unwrap().is_none());
        assert!(cache.take(b"k").unwrap().is_none());
    }

    #[test]
    fn touch_pushes_back_an_imminent_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1024, DiscardPolicy::LruTtl);
        let now = now_ms();
        cache.put(b"a", vec![0; 10], vec![], now + 50).unwrap();
        cache.touch(b"a", now + 60_000).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(cache.contains_key(b"a").unwrap());
        assert_eq!(cache.get(b"a").unwrap().unwrap().value, vec![0; 10]);
    }

    #[test]
    fn resize_evicts_to_fit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 100, DiscardPolicy::LruOnly);
        cache.put(b"a", vec![0; 10], vec![], 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.put(b"b", vec![0; 10], vec![], 0).unwrap();
        cache.resize(10).unwrap();
        assert!(cache.size_in_bytes() <= 10);
        assert!(!cache.contains_key(b"a").unwrap());
        assert!(cache.contains_key(b"b").unwrap());
    }

    #[test]
    fn events_fire_on_get_put_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
        let seen: std::sync::Arc<Mutex<Vec<CacheEvent>>> = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        cache.set_handler(
            EventMask::all(),
            Box::new(move |event, _key| seen2.lock().unwrap().push(event)),
        );
        cache.put(b"k", b"v".to_vec(), vec![], 0).unwrap();
        cache.get(b"k").unwrap();
        cache.get(b"missing").unwrap();
        let events = seen.lock().unwrap().clone();
        assert_eq!(events, vec![CacheEvent::Put, CacheEvent::Get, CacheEvent::Miss]);
    }

    #[test]
    fn reopen_survives_and_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
            cache.put(b"k", b"v".to_vec(), vec![], 0).unwrap();
        }
        let cache = PersistentCache::open_existing(dir.path()).unwrap();
        assert_eq!(cache.get(b"k").unwrap().unwrap().value, b"v");
    }

    #[test]
    fn reopen_with_different_size_is_logic_error() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
        }
        let err = PersistentCache::open(dir.path(), 2048, DiscardPolicy::LruOnly).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LogicError);
    }

    #[test]
    fn corruption_is_detected_and_cache_rebuildable_after_wipe() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
            cache.put(b"k", b"v".to_vec(), vec![], 0).unwrap();
        }
        // Corrupt a byte in the middle of the log's checksum, simulating bit-rot.
        let log_path = dir.path().join(storage::LOG_FILE);
        let mut bytes = std::fs::read(&log_path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&log_path, bytes).unwrap();

        let err = PersistentCache::open_existing(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        // Simulate CacheHelper recovery: wipe and recreate.
        std::fs::remove_file(&log_path).unwrap();
        std::fs::remove_file(dir.path().join(storage::DIRTY_FLAG_FILE)).ok();
        let cache = PersistentCache::open_existing(dir.path()).unwrap();
        assert!(cache.get(b"k").unwrap().is_none());
        assert!(cache.put(b"k2", b"v2".to_vec(), vec![], 0).unwrap());
    }

    #[test]
    fn compact_reclaims_tombstone_space() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1024, DiscardPolicy::LruOnly);
        for i in 0..20u8 {
            cache.put(&[i], vec![0; 20], vec![], 0).unwrap();
        }
        for i in 0..15u8 {
            cache.invalidate(&[i]).unwrap();
        }
        let reclaimed = cache.compact().unwrap();
        assert!(reclaimed > 0);
        assert_eq!(cache.size(), 5);
    }
}
