//! Image transformation: decode, resample, crop, re-encode one derivative.
//!
//! ## Why spawn_blocking?
//!
//! Decode + Lanczos resample + encode of a multi-megapixel JPEG is tens of
//! milliseconds of pure CPU. Running it inline would stall the Tokio worker
//! threads that the rest of the batch (network fetches, storage writes)
//! depends on, so each transform is moved onto the blocking thread pool.
//!
//! ## Why re-decode per spec?
//!
//! Each invocation owns its own decode of the source bytes. Sharing one
//! decoded `DynamicImage` across the five concurrent derivative tasks would
//! require either cloning it anyway (it is resampled to different sizes) or
//! synchronising access; re-decoding keeps every task independent and the
//! hot buffer lifetime short.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

use crate::error::ImageError;
use crate::pipeline::geometry::{self, SourceSize, TargetSpec};

/// Map the URL's file extension to an encode format.
///
/// Only `jpg`/`jpeg` and `png` are recognised; everything else (including
/// query-string noise and extension-less URLs) defaults to JPEG, preserving
/// the behaviour image producers already depend on.
pub fn infer_format(url: &str) -> ImageFormat {
    let ext = url
        .rsplit('.')
        .next()
        .and_then(|tail| tail.split('?').next())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => ImageFormat::Png,
        _ => ImageFormat::Jpeg,
    }
}

/// Read the source dimensions from the image header without a full decode.
pub fn probe_size(bytes: &[u8], url: &str) -> Result<SourceSize, ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
    let (width, height) = reader.into_dimensions().map_err(|e| ImageError::Decode {
        url: url.to_string(),
        detail: e.to_string(),
    })?;
    Ok(SourceSize { width, height })
}

/// Produce one derivative: decode `bytes`, resample to the resolved scaled
/// size, centre-crop when the spec asks for it, re-encode as `format`.
///
/// Offloads the CPU work to `spawn_blocking`; safe to run concurrently for
/// multiple specs against the same source bytes.
pub async fn transform(
    bytes: Vec<u8>,
    format: ImageFormat,
    source: SourceSize,
    spec: TargetSpec,
    url: &str,
) -> Result<Vec<u8>, ImageError> {
    let owner = url.to_string();
    tokio::task::spawn_blocking(move || transform_blocking(&bytes, format, source, spec, &owner))
        .await
        .map_err(|_| ImageError::TaskPanicked {
            url: url.to_string(),
        })?
}

fn transform_blocking(
    bytes: &[u8],
    format: ImageFormat,
    source: SourceSize,
    spec: TargetSpec,
    url: &str,
) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(bytes).map_err(|e| ImageError::Decode {
        url: url.to_string(),
        detail: e.to_string(),
    })?;

    let g = geometry::resolve(source, spec);
    let mut out: DynamicImage =
        img.resize_exact(g.scaled_width, g.scaled_height, FilterType::Lanczos3);

    if let Some(b) = g.crop_box {
        out = out.crop_imm(b.left, b.top, b.width(), b.height());
    }

    // JPEG encoding rejects alpha channels; PNG sources resized for a JPEG
    // target (extension-less URLs) would otherwise fail here.
    if format == ImageFormat::Jpeg && out.color().has_alpha() {
        out = DynamicImage::ImageRgb8(out.to_rgb8());
    }

    let mut buf = Vec::new();
    out.write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| ImageError::Encode {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

    debug!(
        "Transformed {url} → {}x{} ({} bytes)",
        g.output_width,
        g.output_height,
        buf.len()
    );
    Ok(buf)
}
