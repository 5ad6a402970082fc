//! Thumbnailer configuration knobs. See spec.md §6.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThumbnailerConfig {
    pub full_size_cache_size_mb: u64,
    pub thumbnail_cache_size_mb: u64,
    pub failure_cache_size_mb: u64,
    pub max_downloads: usize,
    pub max_extractions: usize,
    pub extraction_timeout_secs: u64,
    pub max_backlog: usize,
    pub retry_not_found_hours: u64,
    pub retry_error_hours: u64,
    pub max_thumbnail_size_px: u32,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for ThumbnailerConfig {
    fn default() -> Self {
        Self {
            full_size_cache_size_mb: 50,
            thumbnail_cache_size_mb: 100,
            failure_cache_size_mb: 2,
            max_downloads: 2,
            max_extractions: 0,
            extraction_timeout_secs: 10,
            max_backlog: 256,
            retry_not_found_hours: 168,
            retry_error_hours: 2,
            max_thumbnail_size_px: 1920,
            backoff_min_secs: 1,
            backoff_max_secs: 2,
        }
    }
}

impl ThumbnailerConfig {
    pub const FILENAME: &str = "thumbnailer.toml";

    pub fn load() -> Self {
        match std::fs::read_to_string(Self::FILENAME) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => panic!("failed to parse {}: {e}", Self::FILENAME),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, creating default config");
                Self::default()
            }
            Err(e) => panic!("failed to read {}: {e}", Self::FILENAME),
        }
    }

    pub fn save(&self) {
        std::fs::write(Self::FILENAME, toml::to_string(self).unwrap()).unwrap();
        tracing::info!("saved config to {}", Self::FILENAME);
    }

    pub fn full_size_cache_size_bytes(&self) -> u64 {
        self.full_size_cache_size_mb * 1024 * 1024
    }

    pub fn thumbnail_cache_size_bytes(&self) -> u64 {
        self.thumbnail_cache_size_mb * 1024 * 1024
    }

    pub fn failure_cache_size_bytes(&self) -> u64 {
        self.failure_cache_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ThumbnailerConfig::default();
        assert_eq!(cfg.full_size_cache_size_mb, 50);
        assert_eq!(cfg.thumbnail_cache_size_mb, 100);
        assert_eq!(cfg.failure_cache_size_mb, 2);
        assert_eq!(cfg.max_downloads, 2);
        assert_eq!(cfg.max_extractions, 0);
        assert_eq!(cfg.extraction_timeout_secs, 10);
        assert_eq!(cfg.retry_not_found_hours, 168);
        assert_eq!(cfg.retry_error_hours, 2);
        assert_eq!(cfg.max_thumbnail_size_px, 1920);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = ThumbnailerConfig::default();
        let s = toml::to_string(&cfg).unwrap();
        let back: ThumbnailerConfig = toml::from_str(&s).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn missing_fields_default() {
        let partial: ThumbnailerConfig = toml::from_str("max_downloads = 5").unwrap();
        assert_eq!(partial.max_downloads, 5);
        assert_eq!(partial.full_size_cache_size_mb, 50);
    }
}
