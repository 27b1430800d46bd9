//! Vidlay Render Engine
//!
//! Local rendering pipeline that composites a background, a positioned
//! overlay image, and an optional overlay video into an encoded video,
//! tracked as a pollable job.
//!
//! # Pipeline Architecture
//!
//! ```text
//! background ──┐
//!              ├── stretch to output frame
//! transform ───┘         │
//!  + scale factor        ├── overlay image (translate → rotate → scale)
//! overlay.png ───────────┘         │
//!                                  ├── overlay video (fixed opacity)
//! overlay.webm ────────────────────┘         │
//!                                            ▼
//!                                 Encoder Adapter (MP4 / WebM)
//!                                            │
//!                                            ▼
//!                                JobStore: completed(result) | failed(error)
//! ```

pub mod compositor;
pub mod encoder;
pub mod ffmpeg;
pub mod job_store;
pub mod media;
pub mod render_loop;

pub use compositor::*;
pub use encoder::*;
pub use ffmpeg::FfmpegHost;
pub use job_store::*;
pub use media::*;
pub use render_loop::*;
