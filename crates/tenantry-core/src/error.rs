//! Error types for Tenantry Core

use std::fmt;

use thiserror::Error;

use crate::lifecycle::{LifecycleError, LifecycleState};
use crate::tenant::TenantId;

#[derive(Debug, Error)]
pub enum Error {
    // Lifecycle errors
    #[error("Tenant not configured: {0}")]
    TenantNotConfigured(TenantId),

    #[error("Tenant engine not available for {tenant_id}: {reason}{}", cause.as_ref().map(|c| format!(" (cause: {})", c)).unwrap_or_default())]
    TenantEngineNotAvailable {
        tenant_id: TenantId,
        reason: String,
        cause: Option<LifecycleError>,
    },

    #[error("Tenant engine not found: {0}")]
    NotFound(TenantId),

    #[error("{0}")]
    AggregateFailure(AggregateFailure),

    #[error("Lifecycle operation failed for {tenant_id}: {cause}")]
    Lifecycle {
        tenant_id: TenantId,
        cause: LifecycleError,
    },

    #[error("Invalid lifecycle transition for {tenant_id}: {from} -> {to}")]
    InvalidTransition {
        tenant_id: TenantId,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // Tenant and path errors
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("Invalid configuration path: {0}")]
    InvalidPath(String),

    // Hosted engine errors
    #[error("Engine error: {0}")]
    Engine(String),

    // Configuration errors
    #[error("Configuration store error: {0}")]
    ConfigStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a bulk operation, naming every tenant that failed.
///
/// Tenants that succeeded are not listed; `attempted` records how many
/// tenants the operation covered in total.
#[derive(Debug)]
pub struct AggregateFailure {
    pub operation: String,
    pub attempted: usize,
    pub failures: Vec<(TenantId, Error)>,
}

impl AggregateFailure {
    /// Tenants whose individual operation failed
    pub fn failed_tenants(&self) -> impl Iterator<Item = &TenantId> {
        self.failures.iter().map(|(tenant_id, _)| tenant_id)
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} of {} tenant engines",
            self.operation,
            self.failures.len(),
            self.attempted
        )?;
        for (i, (tenant_id, error)) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{} ({})", sep, tenant_id, error)?;
        }
        Ok(())
    }
}
