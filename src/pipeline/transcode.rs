//! Image transcoding: arbitrary image bytes → downscaled JPEG data URL.
//!
//! ## Why cap the longer edge?
//!
//! Phone cameras produce 12–48 MP photos. Both sides of the document are sent
//! inline in one JSON body and parked in durable storage between reloads, so
//! the longer edge is capped (1200 px by default) regardless of the source
//! resolution. 1200 px keeps machine-readable zones and printed fields legible
//! while bringing a typical photo down to roughly 100–250 KB.
//!
//! ## Why spawn_blocking?
//!
//! Decoding, resampling and JPEG encoding are CPU-bound and can take hundreds
//! of milliseconds on a large photo. They run on the blocking pool so the
//! async workers stay responsive while the flow shows its processing status.

use crate::config::CaptureConfig;
use crate::error::DocScanError;
use crate::output::{ImageOrigin, InlineImage, RawImage, TranscodedImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage, RgbaImage};
use tracing::debug;

const JPEG_MIME: &str = "image/jpeg";

/// Compute output dimensions: the longer edge is scaled down to
/// `max_dimension`, the other edge follows the aspect ratio.
///
/// Images already within the cap are returned unchanged. Square images take
/// the height branch, which yields the same result.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width > height {
        if width > max_dimension {
            let scaled = (height as f64 * max_dimension as f64 / width as f64).round() as u32;
            return (max_dimension, scaled.max(1));
        }
    } else if height > max_dimension {
        let scaled = (width as f64 * max_dimension as f64 / height as f64).round() as u32;
        return (scaled.max(1), max_dimension);
    }
    (width, height)
}

/// JPEG quality for the given origin.
pub fn quality_for(origin: ImageOrigin, config: &CaptureConfig) -> u8 {
    match origin {
        ImageOrigin::Upload => config.upload_quality,
        ImageOrigin::Capture => config.capture_quality,
    }
}

/// Transcode a raw image on the blocking pool.
pub async fn transcode(
    raw: RawImage,
    config: &CaptureConfig,
) -> Result<TranscodedImage, DocScanError> {
    let max_dimension = config.max_dimension;
    let quality = quality_for(raw.origin, config);

    tokio::task::spawn_blocking(move || transcode_blocking(&raw.bytes, max_dimension, quality))
        .await
        .map_err(|e| DocScanError::Internal(format!("Transcode task panicked: {}", e)))?
}

/// Blocking implementation of [`transcode`].
pub fn transcode_blocking(
    bytes: &[u8],
    max_dimension: u32,
    quality: u8,
) -> Result<TranscodedImage, DocScanError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| DocScanError::Decode {
        detail: e.to_string(),
    })?;
    let (source_width, source_height) = (decoded.width(), decoded.height());
    let (width, height) = target_dimensions(source_width, source_height, max_dimension);

    // JPEG carries no alpha; flatten while resampling so only one full-size
    // buffer is alive at a time.
    let raster: RgbImage = if (width, height) == (source_width, source_height) {
        decoded.into_rgb8()
    } else {
        let resized = decoded.resize_exact(width, height, FilterType::CatmullRom);
        resized.into_rgb8()
    };

    let jpeg = encode_jpeg(&raster, quality)?;
    drop(raster);

    debug!(
        "Transcoded {}x{} → {}x{} (q{}, {} bytes)",
        source_width,
        source_height,
        width,
        height,
        quality,
        jpeg.len()
    );

    Ok(TranscodedImage {
        image: InlineImage::from_bytes(JPEG_MIME, &jpeg),
        source_width,
        source_height,
        width,
        height,
    })
}

/// Encode a live camera frame at its native resolution.
///
/// The result is raw JPEG bytes, not yet transcoded: capture hands it to the
/// same path uploads take.
pub fn encode_frame(frame: &RgbaImage, quality: u8) -> Result<Vec<u8>, DocScanError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(DocScanError::EmptyFrame {
            width: frame.width(),
            height: frame.height(),
        });
    }
    let rgb = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
    encode_jpeg(&rgb, quality)
}

fn encode_jpeg(raster: &RgbImage, quality: u8) -> Result<Vec<u8>, DocScanError> {
    let mut buf = Vec::new();
    raster
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(|e| DocScanError::Encode {
            detail: e.to_string(),
        })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat, Rgb, Rgba};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([40, 90, 200]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    fn output_dims(t: &TranscodedImage) -> (u32, u32) {
        let bytes = t.image.decode_bytes().expect("valid payload");
        image::load_from_memory(&bytes).expect("jpeg decodes").dimensions()
    }

    #[test]
    fn landscape_over_cap_is_scaled_to_cap() {
        assert_eq!(target_dimensions(2400, 1600, 1200), (1200, 800));
        assert_eq!(target_dimensions(4032, 3024, 1200), (1200, 900));
    }

    #[test]
    fn portrait_over_cap_scales_height() {
        assert_eq!(target_dimensions(1600, 2400, 1200), (800, 1200));
        assert_eq!(target_dimensions(3000, 3000, 1200), (1200, 1200));
    }

    #[test]
    fn within_cap_is_unchanged() {
        assert_eq!(target_dimensions(1200, 1200, 1200), (1200, 1200));
        assert_eq!(target_dimensions(640, 480, 1200), (640, 480));
        assert_eq!(target_dimensions(1, 1, 1200), (1, 1));
    }

    #[test]
    fn extreme_aspect_never_collapses_to_zero() {
        assert_eq!(target_dimensions(100_000, 10, 1200), (1200, 1));
    }

    #[test]
    fn aspect_ratio_preserved_within_rounding() {
        for (w, h) in [(2401, 1601), (3333, 1000), (1999, 2001), (5000, 4999)] {
            let (tw, th) = target_dimensions(w, h, 1200);
            assert_eq!(tw.max(th), 1200, "{w}x{h}");
            let src = w as f64 / h as f64;
            let dst = tw as f64 / th as f64;
            // One pixel of rounding on the short edge.
            let tolerance = src / th.min(tw) as f64 + 1e-9;
            assert!((src - dst).abs() <= tolerance, "{w}x{h} → {tw}x{th}");
        }
    }

    #[test]
    fn transcode_downscales_large_upload() {
        let out = transcode_blocking(&png_bytes(2400, 1600), 1200, 70).expect("transcode");
        assert_eq!((out.width, out.height), (1200, 800));
        assert_eq!((out.source_width, out.source_height), (2400, 1600));
        assert_eq!(out.image.mime_type(), "image/jpeg");
        assert_eq!(output_dims(&out), (1200, 800));
    }

    #[test]
    fn transcode_keeps_small_image_dimensions() {
        let out = transcode_blocking(&png_bytes(300, 200), 1200, 70).expect("transcode");
        assert_eq!(output_dims(&out), (300, 200));
    }

    #[test]
    fn transcode_rejects_garbage() {
        let err = transcode_blocking(b"definitely not an image", 1200, 70).unwrap_err();
        assert!(matches!(err, DocScanError::Decode { .. }), "got: {err:?}");
    }

    #[test]
    fn higher_quality_produces_larger_output() {
        // Noisy content so quality actually matters.
        let img = RgbImage::from_fn(256, 256, |x, y| {
            Rgb([(x * 7 ^ y * 13) as u8, (x * y) as u8, (x + y * 3) as u8])
        });
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let low = transcode_blocking(&png, 1200, 70).unwrap();
        let high = transcode_blocking(&png, 1200, 85).unwrap();
        assert!(high.image.len() > low.image.len());
    }

    #[test]
    fn encode_frame_rejects_empty_frame() {
        let err = encode_frame(&RgbaImage::new(0, 0), 85).unwrap_err();
        assert!(matches!(err, DocScanError::EmptyFrame { .. }));
    }

    #[test]
    fn encode_frame_keeps_native_resolution() {
        let frame = RgbaImage::from_pixel(1280, 720, Rgba([10, 20, 30, 255]));
        let jpeg = encode_frame(&frame, 85).expect("encode");
        let decoded = image::load_from_memory(&jpeg).expect("decode");
        assert_eq!(decoded.dimensions(), (1280, 720));
    }

    #[tokio::test]
    async fn async_transcode_uses_origin_quality() {
        let config = CaptureConfig::default();
        assert_eq!(quality_for(ImageOrigin::Upload, &config), 70);
        assert_eq!(quality_for(ImageOrigin::Capture, &config), 85);
        let out = transcode(RawImage::capture(png_bytes(64, 48)), &config)
            .await
            .expect("transcode");
        assert_eq!((out.width, out.height), (64, 48));
    }
}
