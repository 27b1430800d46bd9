//! Frame compositor: background, positioned overlay image, overlay video.
//!
//! Each call to [`FrameCompositor::draw_frame`] rebuilds the target from
//! scratch. Layers are drawn in a fixed order:
//! 1. clear to transparent
//! 2. background stretched to the full frame
//! 3. overlay image placed by its transform
//! 4. overlay video stretched to the full frame at reduced opacity

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use vidlay_render_model::{ScaleFactor, Transform};

/// Opacity of the overlay video in a normal render.
pub const OVERLAY_VIDEO_OPACITY: f32 = 0.6;

/// Opacity of the overlay video while the user is editing placement.
pub const OVERLAY_VIDEO_EDITING_OPACITY: f32 = 0.2;

/// How overlay image pixels are sampled when the placement is not pixel aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampling {
    /// Nearest source pixel. Keeps hard edges exactly where the editor showed them.
    Nearest,
    #[default]
    Bilinear,
}

/// Per-job drawing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerStyle {
    pub sampling: Sampling,
    /// Dims the overlay video so the placement underneath stays visible.
    pub editing: bool,
}

impl LayerStyle {
    pub fn overlay_video_opacity(&self) -> f32 {
        if self.editing {
            OVERLAY_VIDEO_EDITING_OPACITY
        } else {
            OVERLAY_VIDEO_OPACITY
        }
    }
}

/// 2D affine map `(u, v) -> (a*u + c*v + e, b*u + d*v + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Placement {
    /// Compose translate → rotate → scale for `transform` in output space.
    ///
    /// Only the translation is converted by `scale`; the transform's own
    /// scale and angle are coordinate-space independent.
    pub fn from_transform(transform: &Transform, scale: ScaleFactor) -> Self {
        let (tx, ty) = transform.output_origin(scale);
        let (sin, cos) = transform.angle.to_radians().sin_cos();
        Self {
            a: cos * transform.scale_x,
            b: sin * transform.scale_x,
            c: -sin * transform.scale_y,
            d: cos * transform.scale_y,
            e: tx,
            f: ty,
        }
    }

    /// Map a point from image-local space into output space.
    pub fn apply(&self, u: f64, v: f64) -> (f64, f64) {
        (
            self.a * u + self.c * v + self.e,
            self.b * u + self.d * v + self.f,
        )
    }

    /// Inverse map, or `None` when the placement collapses to a line.
    pub fn invert(&self) -> Option<Placement> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f64::EPSILON || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Placement {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }

    /// Output-space bounding box of a `width` × `height` local rectangle.
    pub fn bounds(&self, width: f64, height: f64) -> (f64, f64, f64, f64) {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width, 0.0),
            self.apply(0.0, height),
            self.apply(width, height),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }
}

/// Stateless per-frame compositor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCompositor {
    style: LayerStyle,
}

impl FrameCompositor {
    pub fn new(style: LayerStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> LayerStyle {
        self.style
    }

    /// Draw one output frame into `target`.
    ///
    /// The overlay image is skipped unless both it and `transform` are given.
    pub fn draw_frame(
        &self,
        target: &mut RgbaImage,
        background: Option<&RgbaImage>,
        transform: Option<&Transform>,
        overlay_image: Option<&RgbaImage>,
        overlay_video: Option<&RgbaImage>,
        scale: ScaleFactor,
    ) {
        clear(target);

        if let Some(background) = background {
            draw_stretched(target, background, 1.0);
        }

        if let (Some(image), Some(transform)) = (overlay_image, transform) {
            self.draw_placed(target, image, transform, scale);
        }

        if let Some(video) = overlay_video {
            draw_stretched(target, video, self.style.overlay_video_opacity());
        }
    }

    fn draw_placed(
        &self,
        target: &mut RgbaImage,
        image: &RgbaImage,
        transform: &Transform,
        scale: ScaleFactor,
    ) {
        if image.width() == 0 || image.height() == 0 {
            return;
        }
        let placement = Placement::from_transform(transform, scale);
        let Some(inverse) = placement.invert() else {
            tracing::debug!("Degenerate overlay placement; skipping layer");
            return;
        };

        let (ow, oh) = (transform.original_width, transform.original_height);
        let (x0, y0, x1, y1) = placement.bounds(ow, oh);
        let (tw, th) = (target.width() as f64, target.height() as f64);
        let x_start = x0.floor().clamp(0.0, tw) as u32;
        let x_end = x1.ceil().clamp(0.0, tw) as u32;
        let y_start = y0.floor().clamp(0.0, th) as u32;
        let y_end = y1.ceil().clamp(0.0, th) as u32;

        // Local units → asset pixels; the asset may not match its declared size.
        let sx = image.width() as f64 / ow;
        let sy = image.height() as f64 / oh;

        for py in y_start..y_end {
            for px in x_start..x_end {
                let (u, v) = inverse.apply(px as f64 + 0.5, py as f64 + 0.5);
                if u < 0.0 || v < 0.0 || u >= ow || v >= oh {
                    continue;
                }
                let src = match self.style.sampling {
                    Sampling::Nearest => sample_nearest(image, u * sx, v * sy),
                    Sampling::Bilinear => sample_bilinear(image, u * sx, v * sy),
                };
                let dst = target.get_pixel_mut(px, py);
                dst.0 = over(dst.0, src, 1.0);
            }
        }
    }
}

fn clear(target: &mut RgbaImage) {
    for pixel in target.pixels_mut() {
        *pixel = Rgba([0, 0, 0, 0]);
    }
}

fn draw_stretched(target: &mut RgbaImage, layer: &RgbaImage, opacity: f32) {
    if layer.width() == 0 || layer.height() == 0 {
        return;
    }
    if layer.dimensions() == target.dimensions() {
        blend_layer(target, layer, opacity);
    } else {
        let resized = imageops::resize(layer, target.width(), target.height(), FilterType::Triangle);
        blend_layer(target, &resized, opacity);
    }
}

fn blend_layer(target: &mut RgbaImage, layer: &RgbaImage, opacity: f32) {
    for (dst, src) in target.pixels_mut().zip(layer.pixels()) {
        dst.0 = over(dst.0, src.0, opacity);
    }
}

fn sample_nearest(image: &RgbaImage, x: f64, y: f64) -> [u8; 4] {
    let ix = (x.floor().max(0.0) as u32).min(image.width() - 1);
    let iy = (y.floor().max(0.0) as u32).min(image.height() - 1);
    image.get_pixel(ix, iy).0
}

fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> [u8; 4] {
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let fx = (x - 0.5).clamp(0.0, max_x);
    let fy = (y - 0.5).clamp(0.0, max_y);
    let (x0, y0) = (fx.floor(), fy.floor());
    let (x1, y1) = ((x0 + 1.0).min(max_x), (y0 + 1.0).min(max_y));
    let (tx, ty) = (fx - x0, fy - y0);

    let p00 = image.get_pixel(x0 as u32, y0 as u32).0;
    let p10 = image.get_pixel(x1 as u32, y0 as u32).0;
    let p01 = image.get_pixel(x0 as u32, y1 as u32).0;
    let p11 = image.get_pixel(x1 as u32, y1 as u32).0;

    let mut out = [0u8; 4];
    for i in 0..4 {
        let top = p00[i] as f64 * (1.0 - tx) + p10[i] as f64 * tx;
        let bottom = p01[i] as f64 * (1.0 - tx) + p11[i] as f64 * tx;
        out[i] = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Source-over blend of straight-alpha RGBA8 pixels.
pub fn over(dst: [u8; 4], src: [u8; 4], opacity: f32) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }
    let da = mul_div255(u16::from(dst[3]), 255 - u16::from(sa));
    let out_a = u32::from(sa) + u32::from(da);
    if out_a == 0 {
        return [0, 0, 0, 0];
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let num = u32::from(src[i]) * u32::from(sa) + u32::from(dst[i]) * u32::from(da);
        out[i] = ((num + out_a / 2) / out_a).min(255) as u8;
    }
    out[3] = out_a.min(255) as u8;
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}
