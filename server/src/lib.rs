//! VibeTunnel server: the control-plane HTTP API in front of `vibetunnel-core`.

pub mod error;
pub mod http;
pub mod sse;
pub mod supervisor;

pub use http::{router, AppState};
