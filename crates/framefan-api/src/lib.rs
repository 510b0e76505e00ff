//! Axum HTTP API server.
//!
//! This crate provides:
//! - Render launch, status polling and cleanup endpoints
//! - Liveness and readiness probes
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use hooks::LoggingHook;
pub use routes::create_router;
pub use state::AppState;
