//! Tenantry Core Types and Traits
//!
//! This crate provides the fundamental types and traits shared by every
//! Tenantry crate:
//! - Tenant identity and configuration payloads
//! - The configuration store abstraction and its change notifications
//! - The tenant engine lifecycle contract
//! - Lifecycle states and core error types

pub mod config_store;
pub mod configuration;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod tenant;

pub use config_store::{ConfigEvent, ConfigEventKind, ConfigEventStream, ConfigStore};
pub use configuration::{ConfigVersion, TenantConfiguration};
pub use engine::{Reconfiguration, TenantEngine, TenantEngineFactory};
pub use error::{AggregateFailure, Error, Result};
pub use lifecycle::{LifecycleError, LifecyclePhase, LifecycleState};
pub use tenant::TenantId;

/// Re-exported so engine implementations share the cancellation type
/// used by the lifecycle contract.
pub use tokio_util::sync::CancellationToken;
