//! Decode/rotate/scale/re-encode contract applied to a full-size source image
//! before it is written into the thumbnail cache. See spec.md §4.J.3.
use thumb_cache::Result;

/// A decoded image's pixel dimensions, post EXIF-rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Concrete decode/scale/encode backend, implemented in `thumb-pipeline` on top
/// of the `image` crate. Kept as a trait here so `Thumbnailer` stays decoupled
/// from any particular image library.
pub trait ImagePipeline: Send + Sync {
    /// Decode `source`, apply its EXIF orientation tag (all 8 cases) so the
    /// returned dimensions and any subsequent `scale` call are right-side-up,
    /// and report the post-rotation size.
    fn probe(&self, source: &[u8]) -> Result<ImageDimensions>;

    /// Decode, orient, and scale `source` to exactly `target`, re-encoding in
    /// the output format implied by `source`'s own format.
    fn scale(&self, source: &[u8], target: (u32, u32)) -> Result<Vec<u8>>;
}
