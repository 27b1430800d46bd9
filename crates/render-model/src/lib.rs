//! Vidlay Render Model
//!
//! Defines the core data contracts for overlay renders:
//! - **Transform:** placement of the overlay image (position, scale, rotation)
//!   and the coordinate space it was captured in
//! - **Frame:** coordinate-space sizes and the scale resolver between them
//! - **Job:** lifecycle record of one asynchronous render
//! - **Request:** what a caller submits and what a status check returns
//!
//! Transforms are plain values. Every hand-off (editor to submission,
//! submission to render loop) moves or clones, so later edits never reach
//! an in-flight render.

pub mod frame;
pub mod job;
pub mod request;
pub mod transform;

pub use frame::*;
pub use job::*;
pub use request::*;
pub use transform::*;
