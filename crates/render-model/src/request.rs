//! Submission payloads shared by the local and remote backends.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::frame::FrameSize;
use crate::job::JobParams;
use crate::transform::Transform;

/// Reference to a media asset: a local path or a URL understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.as_path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Whether the reference points at a still image rather than a video.
    pub fn is_still_image(&self) -> bool {
        matches!(
            self.extension().as_deref(),
            Some("png" | "jpg" | "jpeg" | "webp")
        )
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MediaRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MediaRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Everything a caller submits for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Background video (or static backdrop image).
    pub background: MediaRef,
    /// Image placed by `transform`.
    pub overlay_image: MediaRef,
    /// Optional video drawn semi-transparent over everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_video: Option<MediaRef>,
    pub transform: Transform,
    /// Display container the transform was captured in. Falls back to the
    /// transform's own canvas when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_frame: Option<FrameSize>,
    #[serde(flatten)]
    pub params: JobParams,
}

impl RenderRequest {
    pub fn new(background: MediaRef, overlay_image: MediaRef, transform: Transform) -> Self {
        Self {
            background,
            overlay_image,
            overlay_video: None,
            transform,
            preview_frame: None,
            params: JobParams::default(),
        }
    }

    pub fn with_overlay_video(mut self, overlay_video: MediaRef) -> Self {
        self.overlay_video = Some(overlay_video);
        self
    }

    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_preview_frame(mut self, frame: FrameSize) -> Self {
        self.preview_frame = Some(frame);
        self
    }

    /// Coordinate space the transform's position refers to.
    pub fn source_frame(&self) -> Option<FrameSize> {
        self.preview_frame.or(self.transform.canvas)
    }
}

/// Body returned by a successful submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Quality;
    use serde_json::json;

    #[test]
    fn test_request_wire_format_round_trips_flags() {
        let body = json!({
            "background": "bg.mp4",
            "overlayImage": "logo.png",
            "transform": {
                "left": "10", "top": 20, "scaleX": 1, "scaleY": 1,
                "originalWidth": 64, "originalHeight": 64
            },
            "aspectRatio": "16:9",
            "quality": "low",
            "exactPositioning": true
        });
        let request: RenderRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.transform.left, 10.0);
        assert_eq!(request.params.quality, Quality::Low);
        assert!(request.params.exact_positioning);
        assert!(request.overlay_video.is_none());

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["overlayImage"], "logo.png");
        assert_eq!(value["aspectRatio"], "16:9");
        assert_eq!(value["exactPositioning"], true);
    }

    #[test]
    fn test_request_rejects_invalid_transform() {
        let body = json!({
            "background": "bg.mp4",
            "overlayImage": "logo.png",
            "transform": { "left": 0, "top": 0, "scaleX": 1 }
        });
        assert!(serde_json::from_value::<RenderRequest>(body).is_err());
    }

    #[test]
    fn test_source_frame_prefers_preview_frame() {
        let transform = Transform::new(0.0, 0.0, 1.0, 1.0, 0.0, 10.0, 10.0)
            .unwrap()
            .with_canvas(FrameSize::new(800.0, 450.0));
        let request = RenderRequest::new("bg.mp4".into(), "img.png".into(), transform);
        assert_eq!(request.source_frame(), Some(FrameSize::new(800.0, 450.0)));

        let request = request.with_preview_frame(FrameSize::new(1280.0, 720.0));
        assert_eq!(request.source_frame(), Some(FrameSize::new(1280.0, 720.0)));
    }

    #[test]
    fn test_media_ref_detects_still_images() {
        assert!(MediaRef::new("backdrop.PNG").is_still_image());
        assert!(!MediaRef::new("clip.webm").is_still_image());
        assert!(!MediaRef::new("no-extension").is_still_image());
    }
}
