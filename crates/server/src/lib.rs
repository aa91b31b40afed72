//! HTTP and WebSocket surface of the job hub.

pub mod api;
pub mod metrics;
pub mod state;
