//! Advisory exclusive lock on a cache directory, enforcing the "one writer process
//! per cache directory" rule from spec.md §1.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;

use crate::error::{Error, ErrorKind, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_FILE_NAME: &str = ".lock";

/// Whole-directory advisory exclusive lock, backed by an OS `flock`-style lock on
/// a zero-length file inside the directory.
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    /// Open (creating if needed) the lock file for `dir` without acquiring it yet.
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self { path: dir.as_ref().join(LOCK_FILE_NAME), file: None })
    }

    /// Acquire the lock, polling at a fixed ~100ms granularity.
    ///
    /// `timeout` of [`Duration::ZERO`] waits forever. Returns `Ok(true)` on
    /// acquisition, `Ok(false)` on timeout expiry.
    pub fn lock(&mut self, timeout: Duration) -> Result<bool> {
        if self.file.is_some() {
            return Err(Error::new(ErrorKind::AlreadyLocked, "lock already held by this owner"));
        }
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(&self.path)?;
        let deadline = if timeout.is_zero() { None } else { Some(Instant::now() + timeout) };
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    self.file = Some(file);
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Attempt to acquire the lock once, without polling or blocking.
    /// Returns `Ok(true)` on acquisition, `Ok(false)` if another holder has it.
    pub fn try_lock(&mut self) -> Result<bool> {
        if self.file.is_some() {
            return Err(Error::new(ErrorKind::AlreadyLocked, "lock already held by this owner"));
        }
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(&self.path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Release a held lock.
    pub fn unlock(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Err(Error::new(ErrorKind::AlreadyUnlocked, "lock not held by this owner"));
        };
        FileExt::unlock(&file).map_err(Error::from)
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_unlock_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = FileLock::new(dir.path()).unwrap();
        assert!(lock.lock(Duration::ZERO).unwrap());
        assert!(lock.is_locked());
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn double_lock_is_already_locked() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = FileLock::new(dir.path()).unwrap();
        lock.lock(Duration::ZERO).unwrap();
        let err = lock.lock(Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyLocked);
    }

    #[test]
    fn double_unlock_is_already_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = FileLock::new(dir.path()).unwrap();
        lock.lock(Duration::ZERO).unwrap();
        lock.unlock().unwrap();
        let err = lock.unlock().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyUnlocked);
    }

    #[test]
    fn try_lock_fails_fast_when_already_held() {
        let dir = tempfile::tempdir().unwrap();
        let mut holder = FileLock::new(dir.path()).unwrap();
        assert!(holder.try_lock().unwrap());

        let mut contender = FileLock::new(dir.path()).unwrap();
        assert!(!contender.try_lock().unwrap());
    }

    #[test]
    fn second_process_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut holder = FileLock::new(dir.path()).unwrap();
        holder.lock(Duration::ZERO).unwrap();

        let mut contender = FileLock::new(dir.path()).unwrap();
        let acquired = contender.lock(Duration::from_millis(250)).unwrap();
        assert!(!acquired);
    }
}
