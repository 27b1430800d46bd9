//! Vidlay Render Client
//!
//! Caller-facing entry point for render jobs. Submissions go to a remote
//! render service when one is configured and reachable; connectivity faults
//! fall back to the in-process render loop. Status checks look in the local
//! job store first, then ask the remote.

pub mod client;
pub mod http;
pub mod local;
pub mod poll;
pub mod transport;

pub use client::RenderClient;
pub use http::HttpBackend;
pub use local::{LocalBackend, LocalRenderDefaults};
pub use poll::{wait_for_terminal, PollPolicy};
pub use transport::{RemoteBackend, TransportError, TransportErrorKind};
