//! Contract for fetching remote album/artist artwork. See spec.md §4.H.
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Outcome of a download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Success,
    NotFound,
    TemporaryError,
    HardError,
    NetworkDown,
    Timeout,
}

impl ReplyStatus {
    /// Whether this outcome should feed `BackoffAdjuster::adjust_retry_limit`.
    pub fn drives_backoff(self) -> bool {
        matches!(self, ReplyStatus::TemporaryError | ReplyStatus::NetworkDown | ReplyStatus::Timeout)
    }
}

/// The one-shot result of a download attempt.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: ReplyStatus,
    pub bytes: Option<Vec<u8>>,
}

impl Reply {
    pub fn success(bytes: Vec<u8>) -> Self {
        Self { status: ReplyStatus::Success, bytes: Some(bytes) }
    }

    pub fn failed(status: ReplyStatus) -> Self {
        debug_assert_ne!(status, ReplyStatus::Success);
        Self { status, bytes: None }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote artwork fetch, consumed by `ThumbnailRequest` through the downloader
/// `RateLimiter` and gated by a `BackoffAdjuster`.
pub trait Downloader: Send + Sync {
    fn download_album<'a>(&'a self, artist: &'a str, album: &'a str, timeout: Duration) -> BoxFuture<'a, Reply>;
    fn download_artist<'a>(&'a self, artist: &'a str, album: &'a str, timeout: Duration) -> BoxFuture<'a, Reply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_network_and_timeout_drive_backoff() {
        assert!(ReplyStatus::TemporaryError.drives_backoff());
        assert!(ReplyStatus::NetworkDown.drives_backoff());
        assert!(ReplyStatus::Timeout.drives_backoff());
    }

    #[test]
    fn not_found_and_hard_error_do_not_drive_backoff() {
        assert!(!ReplyStatus::NotFound.drives_backoff());
        assert!(!ReplyStatus::HardError.drives_backoff());
        assert!(!ReplyStatus::Success.drives_backoff());
    }
}
