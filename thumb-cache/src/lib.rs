//! Persistent, ordered key-value cache with LRU/TTL eviction, a byte budget,
//! event hooks, and crash-safe on-disk storage.
//!
//! This crate implements the storage tier (spec.md §4, components A-E): a
//! single-process, single-cache-directory store meant to be wrapped by a
//! corruption-recovery layer (`thumb-core::CacheHelper`) rather than opened
//! directly by most callers.

pub mod cache;
pub mod codec;
pub mod error;
pub mod events;
pub mod file_lock;
pub mod stats;
pub mod storage;
pub mod version;

pub use cache::{CacheValue, DiscardPolicy, PersistentCache};
pub use error::{Error, ErrorKind, Result};
pub use events::{CacheEvent, EventMask, Handler};
pub use file_lock::FileLock;
pub use stats::{StatsRef, StatsSnapshot, HISTOGRAM_BINS};
pub use version::{SoftwareVersion, Version, CURRENT_CACHE_VERSION};
