//! Reads/writes the `version` and `cache_version` marker files in a cache directory.
//!
//! Missing files are treated as "previous version = 2.3.0, cache version = 0" per
//! spec.md §4.E, matching `original_source/src/version.cpp`'s defaults. The built-in
//! schema number this binary understands is [`CURRENT_CACHE_VERSION`]; a mismatch
//! signals the surrounding code (here, [`crate::CacheHelper`]) that the cache needs
//! to be wiped and recreated.
use std::path::Path;

/// The schema version this build of the cache format understands.
pub const CURRENT_CACHE_VERSION: u32 = 1;

const VERSION_FILE: &str = "version";
const CACHE_VERSION_FILE: &str = "cache_version";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl Default for SoftwareVersion {
    fn default() -> Self {
        Self { major: 2, minor: 3, micro: 0 }
    }
}

/// Tracks the on-disk version markers for a cache directory and writes them back
/// only if they changed, mirroring the original's destructor-writes-on-change behavior.
pub struct Version {
    dir: std::path::PathBuf,
    software: SoftwareVersion,
    cache_version: u32,
    dirty: bool,
}

impl Version {
    /// Read the version markers from `dir`, defaulting per spec.md §4.E if missing.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let software = read_software_version(&dir).unwrap_or_default();
        let cache_version = read_cache_version(&dir).unwrap_or(0);
        Self { dir, software, cache_version, dirty: false }
    }

    pub fn software_version(&self) -> SoftwareVersion {
        self.software
    }

    pub fn cache_version(&self) -> u32 {
        self.cache_version
    }

    /// Whether the on-disk schema differs from [`CURRENT_CACHE_VERSION`] and the
    /// cache directory must be wiped and recreated.
    pub fn wipe_needed(&self) -> bool {
        self.cache_version != CURRENT_CACHE_VERSION
    }

    /// Stamp the directory with the current software and cache versions.
    pub fn update(&mut self, software: SoftwareVersion) {
        if software != self.software || self.cache_version != CURRENT_CACHE_VERSION {
            self.software = software;
            self.cache_version = CURRENT_CACHE_VERSION;
            self.dirty = true;
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        std::fs::write(
            self.dir.join(VERSION_FILE),
            format!("{} {} {}", self.software.major, self.software.minor, self.software.micro),
        )?;
        std::fs::write(self.dir.join(CACHE_VERSION_FILE), self.cache_version.to_string())?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for Version {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("failed to flush version markers: {e}");
        }
    }
}

fn read_software_version(dir: &Path) -> Option<SoftwareVersion> {
    let contents = std::fs::read_to_string(dir.join(VERSION_FILE)).ok()?;
    let mut parts = contents.split_whitespace();
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let micro = parts.next()?.parse().ok()?;
    Some(SoftwareVersion { major, minor, micro })
}

fn read_cache_version(dir: &Path) -> Option<u32> {
    std::fs::read_to_string(dir.join(CACHE_VERSION_FILE)).ok()?.trim().parse().ok()
}
