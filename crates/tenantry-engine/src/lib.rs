//! Tenantry Tenant Engine Lifecycle Manager
//!
//! This crate hosts the control plane that keeps one engine per tenant:
//! - Tenant engine registry with a per-tenant state machine
//! - Lifecycle manager (assure, restart, remove, bulk operations)
//! - Reconciliation of configuration store events into lifecycle transitions
//! - Configuration path resolution and manager configuration

pub mod bulk;
pub mod config;
mod lifecycle;
pub mod manager;
pub mod paths;
pub mod reconcile;
pub mod registry;

// Re-export commonly used types
pub use bulk::BulkOperationReport;
pub use config::ManagerConfig;
pub use manager::{TenantEngineManager, TenantEngineManagerBuilder};
pub use paths::{PathConfig, TenantPathResolver};
pub use reconcile::{ReconcileOutcome, ReconciliationCoordinator};
pub use registry::TenantEngineRecord;
