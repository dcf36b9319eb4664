//! Geometry resolution: scale factor and crop/fit box for one target spec.
//!
//! Pure arithmetic, no I/O, no errors. In **crop** mode the image is scaled
//! until both target dimensions are covered, then centre-cropped to exactly
//! the target. In **fit** mode the image is scaled to sit entirely inside
//! the target bounds — the output keeps the source aspect ratio, so a
//! 100×50 source fit into 360×240 produces 360×180, not 360×240. Fit mode
//! bounds dimensions, it never forces them.
//!
//! A zero-dimension source is a caller precondition violation (the pipeline
//! probes dimensions from decoded bytes, which are never 0×0), so the
//! division is not defended here.

use serde::{Deserialize, Serialize};

/// One derivative to produce: nominal dimensions plus the crop/fit switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    pub width: u32,
    pub height: u32,
    /// `true`: cover-and-centre-crop to exactly `width`×`height`.
    /// `false`: fit within `width`×`height`, keeping aspect ratio.
    #[serde(default)]
    pub crop: bool,
}

impl TargetSpec {
    pub const fn new(width: u32, height: u32, crop: bool) -> Self {
        Self {
            width,
            height,
            crop,
        }
    }
}

/// Pixel dimensions of a decoded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSize {
    pub width: u32,
    pub height: u32,
}

/// Centered crop window in scaled-image coordinates, `(left, top)`
/// inclusive, `(right, bottom)` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Resolved geometry for one (source, spec) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedGeometry {
    /// Dimensions to resample the source to, before any crop.
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Final stored dimensions. Equal to the spec in crop mode, equal to
    /// the scaled size in fit mode.
    pub output_width: u32,
    pub output_height: u32,
    /// Present only in crop mode.
    pub crop_box: Option<CropBox>,
}

/// Compute scale and crop/fit geometry for `source` against `spec`.
pub fn resolve(source: SourceSize, spec: TargetSpec) -> ResolvedGeometry {
    let sw = f64::from(source.width);
    let sh = f64::from(source.height);
    let tw = f64::from(spec.width);
    let th = f64::from(spec.height);

    let scale = if spec.crop {
        (tw / sw).max(th / sh)
    } else {
        (tw / sw).min(th / sh)
    };

    let scaled_width = (scale * sw).round() as u32;
    let scaled_height = (scale * sh).round() as u32;

    if spec.crop {
        // Centre the target window inside the scaled image. The scaled
        // image covers the target on both axes, so the window always fits.
        let left = (scaled_width.saturating_sub(spec.width)) / 2;
        let top = (scaled_height.saturating_sub(spec.height)) / 2;
        ResolvedGeometry {
            scaled_width,
            scaled_height,
            output_width: spec.width,
            output_height: spec.height,
            crop_box: Some(CropBox {
                left,
                top,
                right: left + spec.width,
                bottom: top + spec.height,
            }),
        }
    } else {
        ResolvedGeometry {
            scaled_width,
            scaled_height,
            output_width: scaled_width,
            output_height: scaled_height,
            crop_box: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_covers_then_centres() {
        // scale = max(70/100, 70/50) = 1.4 → scaled 140×70, centred 70×70
        let g = resolve(
            SourceSize {
                width: 100,
                height: 50,
            },
            TargetSpec::new(70, 70, true),
        );
        assert_eq!((g.scaled_width, g.scaled_height), (140, 70));
        assert_eq!((g.output_width, g.output_height), (70, 70));
        let b = g.crop_box.unwrap();
        assert_eq!((b.left, b.top, b.right, b.bottom), (35, 0, 105, 70));
        assert_eq!((b.width(), b.height()), (70, 70));
    }

    #[test]
    fn fit_bounds_without_forcing() {
        // scale = min(360/100, 240/50) = 3.6 → 360×180, not 360×240
        let g = resolve(
            SourceSize {
                width: 100,
                height: 50,
            },
            TargetSpec::new(360, 240, false),
        );
        assert_eq!((g.scaled_width, g.scaled_height), (360, 180));
        assert_eq!((g.output_width, g.output_height), (360, 180));
        assert!(g.crop_box.is_none());
    }

    #[test]
    fn fit_upscales_small_sources() {
        let g = resolve(
            SourceSize {
                width: 10,
                height: 10,
            },
            TargetSpec::new(70, 70, false),
        );
        assert_eq!((g.output_width, g.output_height), (70, 70));
    }

    #[test]
    fn crop_of_exact_size_is_identity_box() {
        let g = resolve(
            SourceSize {
                width: 250,
                height: 250,
            },
            TargetSpec::new(250, 250, true),
        );
        assert_eq!((g.scaled_width, g.scaled_height), (250, 250));
        let b = g.crop_box.unwrap();
        assert_eq!((b.left, b.top), (0, 0));
    }

    #[test]
    fn portrait_source_landscape_crop() {
        // scale = max(360/200, 240/400) = 1.8 → 360×720, crop centred vertically
        let g = resolve(
            SourceSize {
                width: 200,
                height: 400,
            },
            TargetSpec::new(360, 240, true),
        );
        assert_eq!((g.scaled_width, g.scaled_height), (360, 720));
        let b = g.crop_box.unwrap();
        assert_eq!((b.left, b.top, b.right, b.bottom), (0, 240, 360, 480));
    }
}
