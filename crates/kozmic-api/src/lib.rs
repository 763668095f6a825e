//! HTTP surface of Kozmic.
//!
//! Webhook ingress, the badge redirect, job restarts and the per-client
//! live-log websocket relay.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
