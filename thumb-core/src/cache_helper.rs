//! Thin recovery wrapper around `PersistentCache`. See spec.md §4.L.
use std::path::{Path, PathBuf};

use thumb_cache::{CacheValue, DiscardPolicy, ErrorKind, EventMask, Handler, PersistentCache, Result, SoftwareVersion, Version};

/// Owns a `PersistentCache` and retries once, after a full rebuild, any
/// operation that fails with `Corrupt`. A second failure propagates.
pub struct CacheHelper {
    cache: PersistentCache,
    dir: PathBuf,
    max_size: u64,
    policy: DiscardPolicy,
}

impl CacheHelper {
    /// Open `dir` with the requested size/policy. If the cache already exists
    /// with a different size, re-open at its persisted size and resize in
    /// place rather than failing with `LogicError`.
    pub fn open(dir: impl AsRef<Path>, max_size: u64, policy: DiscardPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let mut version = Version::open(&dir);
        if version.wipe_needed() {
            tracing::warn!(dir = %dir.display(), "cache schema version mismatch, wiping and rebuilding");
            std::fs::remove_dir_all(&dir).ok();
            std::fs::create_dir_all(&dir)?;
            version = Version::open(&dir);
        }
        version.update(SoftwareVersion::default());
        version.flush()?;

        let cache = match PersistentCache::open(&dir, max_size, policy) {
            Ok(cache) => cache,
            Err(e) if e.kind() == ErrorKind::LogicError => {
                let cache = PersistentCache::open_existing(&dir)?;
                cache.resize(max_size)?;
                cache
            }
            Err(e) if e.kind() == ErrorKind::Corrupt => {
                tracing::warn!(dir = %dir.display(), "cache corrupt on open, wiping and rebuilding");
                std::fs::remove_dir_all(&dir).ok();
                std::fs::create_dir_all(&dir)?;
                let mut version = Version::open(&dir);
                version.update(SoftwareVersion::default());
                version.flush()?;
                PersistentCache::open(&dir, max_size, policy)?
            }
            Err(e) => return Err(e),
        };
        Ok(Self { cache, dir, max_size, policy })
    }

    fn recover(&mut self) -> Result<()> {
        tracing::warn!(dir = %self.dir.display(), "cache corrupt, wiping and rebuilding");
        std::fs::remove_dir_all(&self.dir).ok();
        std::fs::create_dir_all(&self.dir)?;
        let mut version = Version::open(&self.dir);
        version.update(SoftwareVersion::default());
        version.flush()?;
        self.cache = PersistentCache::open(&self.dir, self.max_size, self.policy)?;
        Ok(())
    }

    fn with_recovery<T>(&mut self, f: impl Fn(&PersistentCache) -> Result<T>) -> Result<T> {
        match f(&self.cache) {
            Err(e) if e.kind() == ErrorKind::Corrupt => {
                self.recover()?;
                f(&self.cache)
            }
            other => other,
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<CacheValue>> {
        self.with_recovery(|c| c.get(key))
    }

    pub fn contains_key(&mut self, key: &[u8]) -> Result<bool> {
        self.with_recovery(|c| c.contains_key(key))
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>, metadata: Vec<u8>, expiry: i64) -> Result<bool> {
        self.with_recovery(|c| c.put(key, value.clone(), metadata.clone(), expiry))
    }

    pub fn get_or_put(&mut self, key: &[u8], loader: impl Fn() -> Result<(Vec<u8>, Vec<u8>, i64)>) -> Result<Vec<u8>> {
        self.with_recovery(|c| c.get_or_put(key, &loader))
    }

    pub fn put_metadata(&mut self, key: &[u8], metadata: Vec<u8>) -> Result<bool> {
        self.with_recovery(|c| c.put_metadata(key, metadata.clone()))
    }

    pub fn take(&mut self, key: &[u8]) -> Result<Option<CacheValue>> {
        self.with_recovery(|c| c.take(key))
    }

    pub fn invalidate(&mut self, key: &[u8]) -> Result<()> {
        self.with_recovery(|c| c.invalidate(key))
    }

    pub fn invalidate_all(&mut self) -> Result<()> {
        self.with_recovery(|c| c.invalidate_all())
    }

    pub fn touch(&mut self, key: &[u8], expiry: i64) -> Result<bool> {
        self.with_recovery(|c| c.touch(key, expiry))
    }

    pub fn resize(&mut self, new_max: u64) -> Result<()> {
        self.max_size = new_max;
        self.with_recovery(|c| c.resize(new_max))
    }

    pub fn trim_to(&mut self, target_bytes: u64) -> Result<()> {
        self.with_recovery(|c| c.trim_to(target_bytes))
    }

    pub fn compact(&mut self) -> Result<u64> {
        self.with_recovery(|c| c.compact())
    }

    pub fn clear_stats(&self) {
        self.cache.clear_stats();
    }

    pub fn stats_snapshot(&self) -> thumb_cache::StatsSnapshot {
        self.cache.stats_snapshot()
    }

    pub fn set_handler(&self, mask: EventMask, handler: Handler) {
        self.cache.set_handler(mask, handler);
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.cache.size_in_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut helper = CacheHelper::open(dir.path(), 1024, DiscardPolicy::LruOnly).unwrap();
        assert!(helper.put(b"k", b"v".to_vec(), vec![], 0).unwrap());
        assert_eq!(helper.get(b"k").unwrap().unwrap().value, b"v");
    }

    #[test]
    fn reopening_with_a_different_size_resizes_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _helper = CacheHelper::open(dir.path(), 1024, DiscardPolicy::LruOnly).unwrap();
        }
        let helper = CacheHelper::open(dir.path(), 2048, DiscardPolicy::LruOnly).unwrap();
        assert_eq!(helper.size_in_bytes(), 0);
    }

    #[test]
    fn stale_cache_version_wipes_and_restamps() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut helper = CacheHelper::open(dir.path(), 1024, DiscardPolicy::LruOnly).unwrap();
            helper.put(b"k", b"v".to_vec(), vec![], 0).unwrap();
        }

        std::fs::write(dir.path().join("cache_version"), b"0").unwrap();

        let mut helper = CacheHelper::open(dir.path(), 1024, DiscardPolicy::LruOnly).unwrap();
        assert!(helper.get(b"k").unwrap().is_none(), "schema-mismatched entry must not resurrect");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cache_version")).unwrap().trim(),
            thumb_cache::CURRENT_CACHE_VERSION.to_string()
        );
    }

    #[test]
    fn open_recovers_from_on_disk_corruption_and_is_usable_afterward() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut helper = CacheHelper::open(dir.path(), 1024, DiscardPolicy::LruOnly).unwrap();
            helper.put(b"k", b"v".to_vec(), vec![], 0).unwrap();
        }

        let log_path = dir.path().join(thumb_cache::storage::LOG_FILE);
        let mut bytes = std::fs::read(&log_path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&log_path, bytes).unwrap();

        let mut helper = CacheHelper::open(dir.path(), 1024, DiscardPolicy::LruOnly).unwrap();
        assert!(helper.get(b"k").unwrap().is_none(), "wiped entry must not resurrect");
        assert!(helper.put(b"k2", b"v2".to_vec(), vec![], 0).unwrap());
    }
}
