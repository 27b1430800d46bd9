//! Coordinate-space sizes and the scale resolver.
//!
//! Every transform and every container or output buffer has a frame size.
//! A scale factor always comes from dividing the target frame by the source
//! frame per axis; it is never assumed to be 1:1.

use serde::{Deserialize, Serialize};

/// Frames smaller than this on either axis are treated as bogus measurements.
pub const MIN_FRAME_DIMENSION: f64 = 10.0;

/// Width and height of a coordinate space, in that space's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f64,
    pub height: f64,
}

impl FrameSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Frame size of a pixel buffer.
    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self {
            width: width as f64,
            height: height as f64,
        }
    }

    /// Whether both dimensions are finite and at least [`MIN_FRAME_DIMENSION`].
    pub fn is_usable(&self) -> bool {
        self.width.is_finite()
            && self.height.is_finite()
            && self.width >= MIN_FRAME_DIMENSION
            && self.height >= MIN_FRAME_DIMENSION
    }
}

/// Per-axis ratio converting values from one coordinate space to another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactor {
    pub x: f64,
    pub y: f64,
}

impl ScaleFactor {
    pub const IDENTITY: ScaleFactor = ScaleFactor { x: 1.0, y: 1.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Compute the factor mapping `source` coordinates into `target` coordinates.
///
/// Degrades to [`ScaleFactor::IDENTITY`] with a warning when either frame is
/// missing, non-positive, non-finite, or below the sanity floor.
pub fn resolve_scale(source: Option<FrameSize>, target: Option<FrameSize>) -> ScaleFactor {
    let (Some(source), Some(target)) = (source, target) else {
        tracing::warn!(
            ?source,
            ?target,
            "Missing frame size for scale resolution; using 1:1"
        );
        return ScaleFactor::IDENTITY;
    };

    if !source.is_usable() || !target.is_usable() {
        tracing::warn!(
            source_width = source.width,
            source_height = source.height,
            target_width = target.width,
            target_height = target.height,
            "Unusable frame size for scale resolution; using 1:1"
        );
        return ScaleFactor::IDENTITY;
    }

    ScaleFactor {
        x: target.width / source.width,
        y: target.height / source.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resolve_exact_ratio() {
        let scale = resolve_scale(
            Some(FrameSize::new(1280.0, 720.0)),
            Some(FrameSize::new(1920.0, 1080.0)),
        );
        assert_eq!(scale, ScaleFactor::new(1.5, 1.5));
    }

    #[test]
    fn test_resolve_non_uniform_ratio() {
        let scale = resolve_scale(
            Some(FrameSize::new(800.0, 600.0)),
            Some(FrameSize::new(1920.0, 1080.0)),
        );
        assert!((scale.x - 2.4).abs() < 1e-12);
        assert!((scale.y - 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_resolve_degrades_on_zero_and_negative() {
        let good = Some(FrameSize::new(1920.0, 1080.0));
        assert!(resolve_scale(Some(FrameSize::new(0.0, 720.0)), good).is_identity());
        assert!(resolve_scale(good, Some(FrameSize::new(1920.0, -1.0))).is_identity());
        assert!(resolve_scale(None, good).is_identity());
        assert!(resolve_scale(good, None).is_identity());
    }

    #[test]
    fn test_resolve_degrades_below_sanity_floor() {
        let scale = resolve_scale(
            Some(FrameSize::new(9.0, 720.0)),
            Some(FrameSize::new(1920.0, 1080.0)),
        );
        assert!(scale.is_identity());
    }

    #[test]
    fn test_resolve_degrades_on_nan() {
        let scale = resolve_scale(
            Some(FrameSize::new(f64::NAN, 720.0)),
            Some(FrameSize::new(1920.0, 1080.0)),
        );
        assert!(scale.is_identity());
    }

    proptest! {
        #[test]
        fn prop_resolve_is_target_over_source(
            sw in 10.0f64..4000.0,
            sh in 10.0f64..4000.0,
            tw in 10.0f64..4000.0,
            th in 10.0f64..4000.0,
        ) {
            let scale = resolve_scale(Some(FrameSize::new(sw, sh)), Some(FrameSize::new(tw, th)));
            prop_assert_eq!(scale.x, tw / sw);
            prop_assert_eq!(scale.y, th / sh);
        }

        #[test]
        fn prop_non_positive_source_is_identity(
            sw in -4000.0f64..=0.0,
            tw in 10.0f64..4000.0,
        ) {
            let scale = resolve_scale(Some(FrameSize::new(sw, 720.0)), Some(FrameSize::new(tw, 720.0)));
            prop_assert!(scale.is_identity());
        }
    }
}
