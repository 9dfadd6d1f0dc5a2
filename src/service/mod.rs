//! Service layer for the raceway service
//!
//! This module contains the HTTP API, the main application state, service
//! coordination and health checks.

pub mod api;
pub mod app;
pub mod health;

pub use api::{router, ApiError, ApiState};
pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus};
