//! Decode, downscale, and re-encode image plaintext as a JPEG thumbnail.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use keepsake_core::{ErrorKind, MediaError, MediaResult};

/// Largest `maxDimension` a request may ask for
pub const MAX_DIMENSION: u32 = 4096;

pub fn validate_max_dimension(max_dimension: u32) -> MediaResult<()> {
    if max_dimension == 0 || max_dimension > MAX_DIMENSION {
        return Err(MediaError::invalid_request(format!(
            "maxDimension {max_dimension} out of range (1..={MAX_DIMENSION})"
        )));
    }
    Ok(())
}

/// Size that fits inside `max` x `max` with the same aspect ratio. Never
/// larger than the source.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let (w, h, m) = (width as u64, height as u64, max as u64);
    if w >= h {
        (max, ((h * m) / w).max(1) as u32)
    } else {
        (((w * m) / h).max(1) as u32, max)
    }
}

/// Render `plaintext` (any supported image format) as JPEG bytes no larger
/// than `max_dimension` on either side.
pub fn render_jpeg(plaintext: &[u8], max_dimension: u32, quality: u8) -> MediaResult<Vec<u8>> {
    let img = image::load_from_memory(plaintext).map_err(|e| {
        MediaError::new(ErrorKind::InvalidFormat, format!("image decode failed: {e}"))
    })?;
    let (w, h) = fit_within(img.width(), img.height(), max_dimension);
    let img = if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Triangle)
    };

    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|e| MediaError::internal(format!("jpeg encode failed: {e}")))?;
    Ok(out.into_inner())
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}
