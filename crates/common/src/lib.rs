//! Vidlay Common Utilities
//!
//! Shared infrastructure for all Vidlay crates:
//! - Error taxonomy and result alias
//! - Render clock for wall-clock ceilings and frame pacing
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
