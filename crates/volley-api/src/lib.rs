//! Volley API - campaign control surface
//!
//! A thin axum layer over the supervisor: start/pause/resume/stop/status
//! per campaign, plus audit log access and a health probe. No HTML, no
//! auth; this is an operator-facing control socket.

pub mod handlers;
pub mod routes;

pub use routes::{create_router, AppState};
