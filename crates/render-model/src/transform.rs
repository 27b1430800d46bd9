//! Placement transform of the overlay image.
//!
//! A transform is captured by the editing surface on every committed edit.
//! Position is expressed in the coordinate space the edit happened in
//! (usually the editor canvas); scale factors apply to the image's
//! original pixel size, and the angle rotates clockwise about the image's
//! own top-left corner.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::frame::{FrameSize, ScaleFactor};

/// Reasons a raw transform is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("transform must be a JSON object")]
    NotAnObject,

    #[error("missing required field `{field}`")]
    Missing { field: &'static str },

    #[error("field `{field}` is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("field `{field}` must be greater than zero (got {value})")]
    NonPositive { field: &'static str, value: f64 },
}

/// The placement of the overlay image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct Transform {
    /// Horizontal offset of the image's top-left corner.
    pub left: f64,
    /// Vertical offset of the image's top-left corner.
    pub top: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Clockwise rotation in degrees.
    pub angle: f64,
    /// Unscaled width of the source image asset.
    pub original_width: f64,
    /// Unscaled height of the source image asset.
    pub original_height: f64,
    /// Derived: `original_width * scale_x`.
    pub width: f64,
    /// Derived: `original_height * scale_y`.
    pub height: f64,
    /// Derived: `max(scale_x, scale_y)`. Informational only.
    pub scale: f64,
    /// Coordinate space the position was captured in, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas: Option<FrameSize>,
}

impl Transform {
    /// Build a transform from its authoritative fields.
    pub fn new(
        left: f64,
        top: f64,
        scale_x: f64,
        scale_y: f64,
        angle: f64,
        original_width: f64,
        original_height: f64,
    ) -> Result<Self, TransformError> {
        let mut transform = Self {
            left,
            top,
            scale_x,
            scale_y,
            angle,
            original_width,
            original_height,
            width: 0.0,
            height: 0.0,
            scale: 0.0,
            canvas: None,
        };
        transform.check()?;
        transform.recompute();
        Ok(transform)
    }

    /// Attach the coordinate space the position was captured in.
    pub fn with_canvas(mut self, canvas: FrameSize) -> Self {
        self.canvas = Some(canvas);
        self
    }

    /// Validate an untyped transform, coercing numeric strings.
    ///
    /// `left`, `top`, `scaleX`, `scaleY`, `originalWidth` and `originalHeight`
    /// are required. `angle` defaults to 0. `width`, `height` and `scale` are
    /// always recomputed, whatever the input says.
    pub fn validate(raw: &Value) -> Result<Self, TransformError> {
        let obj = raw.as_object().ok_or(TransformError::NotAnObject)?;

        let left = required(obj, "left")?;
        let top = required(obj, "top")?;
        let scale_x = required(obj, "scaleX")?;
        let scale_y = required(obj, "scaleY")?;
        let original_width = required(obj, "originalWidth")?;
        let original_height = required(obj, "originalHeight")?;
        let angle = optional(obj, "angle")?.unwrap_or(0.0);

        let canvas = match obj.get("canvas") {
            None | Some(Value::Null) => None,
            Some(Value::Object(canvas)) => Some(FrameSize::new(
                required(canvas, "width")?,
                required(canvas, "height")?,
            )),
            Some(other) => {
                return Err(TransformError::NotNumeric {
                    field: "canvas",
                    value: other.to_string(),
                })
            }
        };

        let transform = Self::new(
            left,
            top,
            scale_x,
            scale_y,
            angle,
            original_width,
            original_height,
        )?;
        Ok(Self { canvas, ..transform })
    }

    /// Check the invariants on the authoritative fields.
    pub fn check(&self) -> Result<(), TransformError> {
        for (field, value) in [
            ("left", self.left),
            ("top", self.top),
            ("angle", self.angle),
        ] {
            if !value.is_finite() {
                return Err(TransformError::NotNumeric {
                    field,
                    value: value.to_string(),
                });
            }
        }
        for (field, value) in [
            ("scaleX", self.scale_x),
            ("scaleY", self.scale_y),
            ("originalWidth", self.original_width),
            ("originalHeight", self.original_height),
        ] {
            if !value.is_finite() {
                return Err(TransformError::NotNumeric {
                    field,
                    value: value.to_string(),
                });
            }
            if value <= 0.0 {
                return Err(TransformError::NonPositive { field, value });
            }
        }
        Ok(())
    }

    /// Refresh the derived fields from the authoritative ones.
    pub fn recompute(&mut self) {
        self.width = self.original_width * self.scale_x;
        self.height = self.original_height * self.scale_y;
        self.scale = self.scale_x.max(self.scale_y);
    }

    /// On-screen size of the image before rotation.
    pub fn placed_size(&self) -> (f64, f64) {
        (
            self.original_width * self.scale_x,
            self.original_height * self.scale_y,
        )
    }

    /// Top-left corner in output space. Only the translation is rescaled;
    /// scale factors and angle are space-independent.
    pub fn output_origin(&self, scale: ScaleFactor) -> (f64, f64) {
        (self.left * scale.x, self.top * scale.y)
    }
}

impl TryFrom<Value> for Transform {
    type Error = TransformError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::validate(&value)
    }
}

fn required(obj: &Map<String, Value>, field: &'static str) -> Result<f64, TransformError> {
    optional(obj, field)?.ok_or(TransformError::Missing { field })
}

fn optional(obj: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, TransformError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => coerce(field, value).map(Some),
    }
}

fn coerce(field: &'static str, value: &Value) -> Result<f64, TransformError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .ok_or_else(|| TransformError::NotNumeric {
            field,
            value: value.to_string(),
        })
}
