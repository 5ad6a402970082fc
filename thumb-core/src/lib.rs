pub mod backoff;
pub mod cache_helper;
pub mod config;
pub mod downloader;
pub mod extractor;
pub mod fingerprint;
pub mod image_pipeline;
pub mod rate_limiter;
pub mod request;
pub mod thumbnailer;

pub use backoff::BackoffAdjuster;
pub use cache_helper::CacheHelper;
pub use config::ThumbnailerConfig;
pub use downloader::{Downloader, Reply, ReplyStatus};
pub use extractor::{ExtractStatus, Extractor, FrameExtractor};
pub use fingerprint::{FingerprintKind, RequestFingerprint, RequestedSize};
pub use image_pipeline::{ImageDimensions, ImagePipeline};
pub use rate_limiter::{CancelToken, Job, RateLimiter};
pub use thumbnailer::{RequestSource, ThumbnailHandle, ThumbnailOutcome, Thumbnailer};

pub use thumb_cache::{DiscardPolicy, Error, ErrorKind, Result};
