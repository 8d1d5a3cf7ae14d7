pub mod params;

use crate::ProxyError;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;

pub use params::{Geometry, Operation, SizeQuery, MAX_DIMENSION};

/// Decode/transform/encode capability behind the two operations.
///
/// Implementations are synchronous and CPU-bound; [`dispatch`] moves them onto
/// the blocking pool.
pub trait ImageEngine: Send + Sync {
    /// Cover-crop `source` to exactly `width`x`height`.
    fn fit(&self, source: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ProxyError>;

    /// Scale `source` to `width`, keeping the aspect ratio.
    fn resize(&self, source: &[u8], width: u32) -> Result<Vec<u8>, ProxyError>;
}

/// Default engine: `image` for decoding and resampling, libwebp for output.
#[derive(Debug, Clone)]
pub struct WebpEngine {
    quality: u8,
}

impl WebpEngine {
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }
}

impl ImageEngine for WebpEngine {
    fn fit(&self, source: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ProxyError> {
        let img = decode_image(source)?;
        encode_webp(&fit_image(&img, width, height), self.quality)
    }

    fn resize(&self, source: &[u8], width: u32) -> Result<Vec<u8>, ProxyError> {
        let img = decode_image(source)?;
        encode_webp(&resize_image(&img, width)?, self.quality)
    }
}

/// Runs the operation named by `geometry` on the blocking pool.
///
/// A panicking engine surfaces as a `TransformError` like any other engine
/// failure.
pub async fn dispatch(
    engine: Arc<dyn ImageEngine>,
    source: Bytes,
    geometry: Geometry,
) -> Result<Vec<u8>, ProxyError> {
    tokio::task::spawn_blocking(move || match geometry {
        Geometry::Fit { width, height } => engine.fit(&source, width, height),
        Geometry::Resize { width } => engine.resize(&source, width),
    })
    .await
    .map_err(|e| ProxyError::TransformError(format!("Transform task failed: {}", e)))?
}

/// Decodes raw image bytes, detecting the format from magic bytes.
///
/// # Errors
/// Returns `ProxyError::TransformError` when the format is unknown or the
/// data is corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ProxyError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| ProxyError::TransformError(e.to_string()))?;

    image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| ProxyError::TransformError(e.to_string()))
}

/// Center-crops the source to the box's aspect ratio, then scales to exactly
/// `width`x`height`.
///
/// Cropping first keeps every intermediate buffer within the source or the
/// output size, however extreme the source aspect ratio.
pub fn fit_image(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    let (w, h) = (width as u64, height as u64);

    let (crop_w, crop_h) = if src_w as u64 * h > src_h as u64 * w {
        ((src_h as u64 * w / h).max(1) as u32, src_h)
    } else {
        (src_w, (src_w as u64 * h / w).max(1) as u32)
    };
    let x = (src_w - crop_w) / 2;
    let y = (src_h - crop_h) / 2;

    img.crop_imm(x, y, crop_w, crop_h)
        .resize_exact(width, height, FilterType::Lanczos3)
}

/// Output height for scaling a `src_w`x`src_h` source to `width`.
///
/// Never below 1 pixel.
pub fn resize_height(src_w: u32, src_h: u32, width: u32) -> u32 {
    let height = (src_h as u64 * width as u64 + src_w.max(1) as u64 / 2) / src_w.max(1) as u64;
    height.clamp(1, u32::MAX as u64) as u32
}

/// Scales to `width`; height follows the source aspect ratio.
///
/// # Errors
/// `TransformError` when the derived height exceeds [`MAX_DIMENSION`]; the
/// check runs before any pixel buffer is allocated.
pub fn resize_image(img: &DynamicImage, width: u32) -> Result<DynamicImage, ProxyError> {
    let (src_w, src_h) = img.dimensions();
    let height = resize_height(src_w, src_h, width);
    if height > MAX_DIMENSION {
        return Err(ProxyError::TransformError(format!(
            "Resized height {} exceeds maximum dimension of {}",
            height, MAX_DIMENSION
        )));
    }

    Ok(img.resize_exact(width, height, FilterType::Lanczos3))
}

/// Lossy WebP encode. Alpha is kept when the source has it.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ProxyError> {
    let q = quality.clamp(1, 100) as f32;
    let (w, h) = img.dimensions();

    let encoded = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode_simple(false, q)
    } else {
        let rgb = img.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode_simple(false, q)
    };

    encoded
        .map(|mem| mem.to_vec())
        .map_err(|e| ProxyError::TransformError(format!("WebP encode failed: {:?}", e)))
}
