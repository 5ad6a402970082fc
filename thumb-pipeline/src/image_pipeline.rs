//! Default `ImagePipeline`: decode/EXIF-rotate/scale/re-encode via the `image`
//! crate and `kamadak-exif`. Grounded on `cover_art_cache.rs::save_to_disk_cache`'s
//! decode/resize/encode sequence, generalized from a fixed low-res thumbnail to
//! an arbitrary target box and extended with EXIF orientation correction, which
//! no example repo in the pack performs — picked fresh (see DESIGN.md).
use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use thumb_cache::{Error, ErrorKind, Result};
use thumb_core::image_pipeline::{ImageDimensions, ImagePipeline};

/// EXIF orientation tag, applied before any dimensions are reported or scaling
/// is performed so both reflect the right-side-up image.
fn exif_orientation(source: &[u8]) -> u32 {
    let mut cursor = Cursor::new(source);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// The 8 canonical EXIF orientation cases (JEITA CP-3451).
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn decode_oriented(source: &[u8]) -> Result<DynamicImage> {
    let orientation = exif_orientation(source);
    let img = image::load_from_memory(source)
        .map_err(|e| Error::new(ErrorKind::HardError, format!("unsupported or corrupt image: {e}")))?;
    Ok(apply_orientation(img, orientation))
}

pub struct DefaultImagePipeline;

impl ImagePipeline for DefaultImagePipeline {
    fn probe(&self, source: &[u8]) -> Result<ImageDimensions> {
        let img = decode_oriented(source)?;
        Ok(ImageDimensions { width: img.width(), height: img.height() })
    }

    fn scale(&self, source: &[u8], target: (u32, u32)) -> Result<Vec<u8>> {
        let img = decode_oriented(source)?;
        let format = image::guess_format(source).unwrap_or(ImageFormat::Jpeg);
        let scaled = if (img.width(), img.height()) == target {
            img
        } else {
            img.resize_exact(target.0, target.1, image::imageops::FilterType::Lanczos3)
        };
        let mut buffer = Cursor::new(Vec::new());
        scaled
            .write_to(&mut buffer, format)
            .map_err(|e| Error::new(ErrorKind::HardError, format!("failed to encode thumbnail: {e}")))?;
        Ok(buffer.into_inner())
    }
}
