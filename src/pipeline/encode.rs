//! Image encoding: `DynamicImage` → baseline JPEG bytes.
//!
//! Every page is normalised to 8-bit RGB before encoding. PDFium hands back
//! RGBA bitmaps, and some producers emit grayscale or CMYK-derived surfaces;
//! the JPEG encoder accepts none of the alpha variants.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::borrow::Cow;
use tracing::debug;

pub const JPEG_MIME: &str = "image/jpeg";

/// Convert any colour model other than 8-bit RGB into 8-bit RGB.
pub fn normalize_color(img: &DynamicImage) -> Cow<'_, DynamicImage> {
    match img {
        DynamicImage::ImageRgb8(_) => Cow::Borrowed(img),
        other => Cow::Owned(DynamicImage::ImageRgb8(other.to_rgb8())),
    }
}

/// Encode a page as JPEG at `quality` (1–100, clamped).
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = normalize_color(img);
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;

    debug!(
        "Encoded {}x{} page → {} bytes JPEG",
        rgb.width(),
        rgb.height(),
        buf.len()
    );
    Ok(buf)
}
