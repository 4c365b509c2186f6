//! Tenantry Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Structured logging setup
//! - Health endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthState, ReadinessChecker, ReadinessResponse, TenantStatus, health_router};
pub use logging::{LoggingConfig, init_logging};
pub use metrics::Metrics;
