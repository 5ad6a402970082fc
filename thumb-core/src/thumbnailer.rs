//! Composition root: owns the three caches, the two rate limiters, the
//! backoff state, and the in-flight request table. See spec.md §4.K.
//!
//! Runs on a single-threaded cooperative event loop (a `tokio::task::LocalSet`
//! on a current-thread runtime): the rate limiters and backoff adjuster are
//! plain `RefCell`s, not `Mutex`es, matching `original_source/src/ratelimiter.cpp`'s
//! "driven from one event loop" contract.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;

use thumb_cache::{DiscardPolicy, ErrorKind};

use crate::backoff::BackoffAdjuster;
use crate::cache_helper::CacheHelper;
use crate::config::ThumbnailerConfig;
use crate::downloader::{Downloader, ReplyStatus};
use crate::extractor::{Extractor, FrameExtractor};
use crate::fingerprint::{RequestFingerprint, RequestedSize};
use crate::image_pipeline::ImagePipeline;
use crate::rate_limiter::RateLimiter;
use crate::request::{clamp_requested_size, failure_ttl_tier, target_dimensions};

fn now_ms() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64
}

/// The resolved outcome of a thumbnail request: either bytes or an error kind.
#[derive(Debug, Clone)]
pub struct ThumbnailOutcome {
    pub bytes: Option<Vec<u8>>,
    pub error: Option<ErrorKind>,
}

impl ThumbnailOutcome {
    fn ok(bytes: Vec<u8>) -> Self {
        Self { bytes: Some(bytes), error: None }
    }

    fn err(kind: ErrorKind) -> Self {
        Self { bytes: None, error: Some(kind) }
    }
}

struct PendingEntry {
    notify: Notify,
    outcome: RefCell<Option<ThumbnailOutcome>>,
}

impl PendingEntry {
    fn new() -> Self {
        Self { notify: Notify::new(), outcome: RefCell::new(None) }
    }

    fn finish(&self, outcome: ThumbnailOutcome) {
        *self.outcome.borrow_mut() = Some(outcome);
        self.notify.notify_waiters();
    }
}

/// A caller's view onto a (possibly coalesced, possibly still in-flight)
/// request. Cancelling a handle only affects that caller's view: the
/// underlying fetch still runs to completion and populates the caches for
/// every other caller coalesced onto the same fingerprint.
pub struct ThumbnailHandle {
    entry: Rc<PendingEntry>,
    cancelled: Cell<bool>,
}

impl ThumbnailHandle {
    fn new(entry: Rc<PendingEntry>) -> Self {
        Self { entry, cancelled: Cell::new(false) }
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
        self.entry.notify.notify_waiters();
    }

    pub fn is_finished(&self) -> bool {
        self.cancelled.get() || self.entry.outcome.borrow().is_some()
    }

    pub fn bytes(&self) -> Option<Vec<u8>> {
        if self.cancelled.get() {
            return None;
        }
        self.entry.outcome.borrow().as_ref().and_then(|o| o.bytes.clone())
    }

    pub fn error_message(&self) -> Option<String> {
        if self.cancelled.get() {
            return Some(ErrorKind::Cancelled.to_string());
        }
        self.entry.outcome.borrow().as_ref().and_then(|o| o.error).map(|k| k.to_string())
    }

    pub fn is_valid(&self) -> bool {
        self.bytes().is_some()
    }

    pub async fn wait_for_finished(&self) {
        while !self.is_finished() {
            self.entry.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimiterKind {
    Extractor,
    Downloader,
}

/// What a request needs fetched before it can be scaled.
pub enum RequestSource {
    LocalFile { path: PathBuf, file: std::fs::File },
    AlbumArt { artist: String, album: String },
    ArtistArt { artist: String, album: String },
}

/// Owns every piece of per-process thumbnailer state: the three
/// `CacheHelper`s (full-size, thumbnail, failure), the extraction/download
/// rate limiters, the download backoff adjuster, and the coalescing table of
/// in-flight requests.
pub struct Thumbnailer<D, F, P> {
    config: ThumbnailerConfig,
    full_size_cache: RefCell<CacheHelper>,
    thumbnail_cache: RefCell<CacheHelper>,
    failure_cache: RefCell<CacheHelper>,
    extractor_limiter: RefCell<RateLimiter>,
    downloader_limiter: RefCell<RateLimiter>,
    backoff: RefCell<BackoffAdjuster>,
    pending: RefCell<HashMap<Vec<u8>, Rc<PendingEntry>>>,
    downloader: D,
    extractor: Extractor<F>,
    pipeline: P,
    scratch_dir: PathBuf,
}

impl<D, F, P> Thumbnailer<D, F, P>
where
    D: Downloader + 'static,
    F: FrameExtractor + 'static,
    P: ImagePipeline + 'static,
{
    pub fn open(
        cache_root: impl AsRef<Path>,
        config: ThumbnailerConfig,
        downloader: D,
        extractor: F,
        pipeline: P,
    ) -> thumb_cache::Result<Rc<Self>> {
        let cache_root = cache_root.as_ref();
        let full_size_cache =
            CacheHelper::open(cache_root.join("full_size"), config.full_size_cache_size_bytes(), DiscardPolicy::LruOnly)?;
        let thumbnail_cache =
            CacheHelper::open(cache_root.join("thumbnails"), config.thumbnail_cache_size_bytes(), DiscardPolicy::LruOnly)?;
        let failure_cache =
            CacheHelper::open(cache_root.join("failures"), config.failure_cache_size_bytes(), DiscardPolicy::LruTtl)?;
        let scratch_dir = cache_root.join("scratch");
        std::fs::create_dir_all(&scratch_dir)?;
        Ok(Rc::new(Self {
            extractor_limiter: RefCell::new(RateLimiter::new(config.max_extractions)),
            downloader_limiter: RefCell::new(RateLimiter::new(config.max_downloads)),
            backoff: RefCell::new(BackoffAdjuster::new(
                Duration::from_secs(config.backoff_min_secs),
                Duration::from_secs(config.backoff_max_secs),
            )),
            config,
            full_size_cache: RefCell::new(full_size_cache),
            thumbnail_cache: RefCell::new(thumbnail_cache),
            failure_cache: RefCell::new(failure_cache),
            pending: RefCell::new(HashMap::new()),
            downloader,
            extractor: Extractor::new(extractor),
            pipeline,
            scratch_dir,
        }))
    }

    pub fn get_thumbnail(self: &Rc<Self>, path: PathBuf, requested_size: RequestedSize) -> Rc<ThumbnailHandle> {
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return self.immediate_failure(ErrorKind::NotFound),
        };
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return self.immediate_failure(ErrorKind::NotFound),
        };
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let inode = std::os::unix::fs::MetadataExt::ino(&meta);
        let fp = RequestFingerprint::local_file(path.clone(), mtime_ms, inode, requested_size);
        self.submit(fp, RequestSource::LocalFile { path, file })
    }

    pub fn get_album_art(self: &Rc<Self>, artist: String, album: String, requested_size: RequestedSize) -> Rc<ThumbnailHandle> {
        let fp = RequestFingerprint::album_art(artist.clone(), album.clone(), requested_size);
        self.submit(fp, RequestSource::AlbumArt { artist, album })
    }

    pub fn get_artist_art(self: &Rc<Self>, artist: String, album: String, requested_size: RequestedSize) -> Rc<ThumbnailHandle> {
        let fp = RequestFingerprint::artist_art(artist.clone(), album.clone(), requested_size);
        self.submit(fp, RequestSource::ArtistArt { artist, album })
    }

    pub fn clear_cache(&self) -> thumb_cache::Result<()> {
        self.full_size_cache.borrow_mut().invalidate_all()?;
        self.thumbnail_cache.borrow_mut().invalidate_all()?;
        self.failure_cache.borrow_mut().invalidate_all()?;
        Ok(())
    }

    pub fn stats(&self) -> (thumb_cache::StatsSnapshot, thumb_cache::StatsSnapshot, thumb_cache::StatsSnapshot) {
        (
            self.full_size_cache.borrow().stats_snapshot(),
            self.thumbnail_cache.borrow().stats_snapshot(),
            self.failure_cache.borrow().stats_snapshot(),
        )
    }

    fn immediate_failure(self: &Rc<Self>, kind: ErrorKind) -> Rc<ThumbnailHandle> {
        let entry = Rc::new(PendingEntry::new());
        entry.finish(ThumbnailOutcome::err(kind));
        Rc::new(ThumbnailHandle::new(entry))
    }

    fn submit(self: &Rc<Self>, fp: RequestFingerprint, source: RequestSource) -> Rc<ThumbnailHandle> {
        let thumb_key = fp.thumb_key();
        if let Some(existing) = self.pending.borrow().get(&thumb_key) {
            return Rc::new(ThumbnailHandle::new(existing.clone()));
        }
        if self.pending.borrow().len() >= self.config.max_backlog {
            return self.immediate_failure(ErrorKind::TemporaryError);
        }

        let entry = Rc::new(PendingEntry::new());
        self.pending.borrow_mut().insert(thumb_key.clone(), entry.clone());

        let this = self.clone();
        let entry_for_task = entry.clone();
        let key_for_task = thumb_key.clone();
        tokio::task::spawn_local(async move {
            let pending = this.clone();
            let outcome = this.run(fp, source).await;
            pending.pending.borrow_mut().remove(&key_for_task);
            entry_for_task.finish(outcome);
        });

        Rc::new(ThumbnailHandle::new(entry))
    }

    async fn run(self: Rc<Self>, fp: RequestFingerprint, source: RequestSource) -> ThumbnailOutcome {
        let thumb_key = fp.thumb_key();
        let source_key = fp.source_key();

        if let Ok(Some(memo)) = self.failure_cache.borrow_mut().get(&source_key) {
            let kind = decode_error_kind(&memo.value);
            return ThumbnailOutcome::err(kind);
        }

        if let Ok(Some(hit)) = self.thumbnail_cache.borrow_mut().get(&thumb_key) {
            return ThumbnailOutcome::ok(hit.value);
        }

        let cached_full_size = self.full_size_cache.borrow_mut().get(&source_key);
        let full_size = match cached_full_size {
            Ok(Some(hit)) => hit.value,
            _ => match self.fetch_source(&source_key, source).await {
                Ok(bytes) => bytes,
                Err(kind) => {
                    self.memoize_failure(&source_key, kind);
                    return ThumbnailOutcome::err(kind);
                }
            },
        };

        let requested = clamp_requested_size(fp.target_size, self.config.max_thumbnail_size_px);
        let scaled = match self.pipeline.probe(&full_size).and_then(|dims| {
            let target = target_dimensions(requested, (dims.width, dims.height));
            self.pipeline.scale(&full_size, target)
        }) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.memoize_failure(&source_key, e.kind());
                return ThumbnailOutcome::err(e.kind());
            }
        };

        let _ = self.thumbnail_cache.borrow_mut().put(&thumb_key, scaled.clone(), Vec::new(), 0);
        ThumbnailOutcome::ok(scaled)
    }

    async fn fetch_source(self: &Rc<Self>, source_key: &[u8], source: RequestSource) -> Result<Vec<u8>, ErrorKind> {
        let bytes = match source {
            RequestSource::LocalFile { path, file } => {
                let dest = self.scratch_dir.join(format!("extract-{}.out", now_ms()));
                let timeout = Duration::from_secs(self.config.extraction_timeout_secs);
                let this = self.clone();
                let dest_for_fut = dest.clone();
                let result = self
                    .through_limiter(LimiterKind::Extractor, async move {
                        this.extractor.extract(file, &dest_for_fut, timeout).await
                    })
                    .await;
                let _ = std::fs::remove_file(&dest);
                result
                    .map_err(|e| e.kind())
                    .inspect_err(|&k| tracing::debug!(path = %path.display(), kind = %k, "extraction failed"))?
            }
            RequestSource::AlbumArt { artist, album } => self.fetch_remote(true, artist, album).await?,
            RequestSource::ArtistArt { artist, album } => self.fetch_remote(false, artist, album).await?,
        };
        let _ = self.full_size_cache.borrow_mut().put(source_key, bytes.clone(), Vec::new(), 0);
        Ok(bytes)
    }

    async fn fetch_remote(self: &Rc<Self>, is_album: bool, artist: String, album: String) -> Result<Vec<u8>, ErrorKind> {
        if !self.backoff.borrow().retry_ok() {
            return Err(ErrorKind::TemporaryError);
        }
        let timeout = Duration::from_secs(self.config.extraction_timeout_secs);
        let this = self.clone();
        let reply = self
            .through_limiter(LimiterKind::Downloader, async move {
                if is_album {
                    this.downloader.download_album(&artist, &album, timeout).await
                } else {
                    this.downloader.download_artist(&artist, &album, timeout).await
                }
            })
            .await;
        if reply.status.drives_backoff() {
            self.backoff.borrow_mut().adjust_retry_limit();
        } else {
            self.backoff.borrow_mut().reset();
        }
        match reply.status {
            ReplyStatus::Success => reply.bytes.ok_or(ErrorKind::HardError),
            ReplyStatus::NotFound => Err(ErrorKind::NotFound),
            ReplyStatus::Timeout => Err(ErrorKind::Timeout),
            ReplyStatus::TemporaryError | ReplyStatus::NetworkDown => Err(ErrorKind::TemporaryError),
            ReplyStatus::HardError => Err(ErrorKind::HardError),
        }
    }

    /// Runs `fut` under the named rate limiter: started immediately if under
    /// the concurrency cap, otherwise queued and started when an earlier job
    /// calls `done`. See `RateLimiter` (spec.md §4.G).
    async fn through_limiter<Fut, T>(self: &Rc<Self>, which: LimiterKind, fut: Fut) -> T
    where
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel::<T>();
        let this = self.clone();
        let job: crate::rate_limiter::Job = Box::new(move || {
            tokio::task::spawn_local(async move {
                let result = fut.await;
                this.limiter(which).borrow_mut().done();
                let _ = tx.send(result);
            });
        });
        self.limiter(which).borrow_mut().schedule(job);
        rx.await.expect("rate-limited job dropped without completing")
    }

    fn limiter(&self, which: LimiterKind) -> &RefCell<RateLimiter> {
        match which {
            LimiterKind::Extractor => &self.extractor_limiter,
            LimiterKind::Downloader => &self.downloader_limiter,
        }
    }

    fn memoize_failure(&self, source_key: &[u8], kind: ErrorKind) {
        let Some(ttl) = failure_ttl_tier(kind, self.config.retry_not_found_hours, self.config.retry_error_hours) else {
            return;
        };
        let expiry = now_ms() + ttl.as_millis() as i64;
        let _ = self.failure_cache.borrow_mut().put(source_key, encode_error_kind(kind), Vec::new(), expiry);
    }
}

fn encode_error_kind(kind: ErrorKind) -> Vec<u8> {
    (match kind {
        ErrorKind::NotFound => "not_found",
        ErrorKind::Timeout => "timeout",
        ErrorKind::TemporaryError => "temporary_error",
        ErrorKind::HardError => "hard_error",
        _ => "hard_error",
    })
    .as_bytes()
    .to_vec()
}

fn decode_error_kind(bytes: &[u8]) -> ErrorKind {
    match bytes {
        b"not_found" => ErrorKind::NotFound,
        b"timeout" => ErrorKind::Timeout,
        b"temporary_error" => ErrorKind::TemporaryError,
        _ => ErrorKind::HardError,
    }
}
