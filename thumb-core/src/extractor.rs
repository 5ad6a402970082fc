//! Wraps the external frame-extractor helper process. See spec.md §4.I.
use std::fs::File;
use std::future::Future;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use thumb_cache::{Error, ErrorKind, Result};

/// Exit status of the external helper, per spec.md §6's helper process contract:
/// `0` success, `1` no frame available, `2` pipeline failure, anything else unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStatus {
    Success,
    NoFrame,
    PipelineFailure,
    Unknown(i32),
}

impl From<i32> for ExtractStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => ExtractStatus::Success,
            1 => ExtractStatus::NoFrame,
            2 => ExtractStatus::PipelineFailure,
            other => ExtractStatus::Unknown(other),
        }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The external capability: launch a helper against a duplicated file
/// descriptor and a destination path, and report how it exited.
pub trait FrameExtractor: Send + Sync {
    fn extract<'a>(&'a self, fd: OwnedFd, dest_path: &'a Path, timeout: Duration) -> BoxFuture<'a, ExtractStatus>;
}

/// Enforces the `FrameExtractor` usage contract: only regular, non-empty
/// sources are accepted; a watchdog bounds the helper's runtime; the
/// duplicated descriptor is released on every exit path via `OwnedFd`'s drop.
pub struct Extractor<E> {
    inner: E,
}

impl<E: FrameExtractor> Extractor<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub async fn extract(&self, file: File, dest_path: &Path, timeout: Duration) -> Result<Vec<u8>> {
        let meta = file.metadata()?;
        if !meta.is_file() || meta.len() == 0 {
            return Err(Error::new(ErrorKind::HardError, "source is not a regular, non-empty file"));
        }
        let fd: OwnedFd = file.into();
        let fut = self.inner.extract(fd, dest_path, timeout);
        match tokio::time::timeout(timeout, fut).await {
            Ok(ExtractStatus::Success) => std::fs::read(dest_path).map_err(Error::from),
            Ok(ExtractStatus::NoFrame) => Err(Error::new(ErrorKind::NotFound, "no frame available")),
            Ok(ExtractStatus::PipelineFailure) => Err(Error::new(ErrorKind::HardError, "extraction pipeline failed")),
            Ok(ExtractStatus::Unknown(code)) => {
                Err(Error::new(ErrorKind::HardError, format!("unrecognized helper exit code {code}")))
            }
            Err(_elapsed) => Err(Error::new(ErrorKind::Timeout, "extraction watchdog expired")),
        }
        // `fd` (and any helper-side copy) is dropped here regardless of which
        // branch above was taken.
    }
}
