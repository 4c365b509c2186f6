//! Outcome reporting for operations fanned out across tenants

use std::fmt;

use tenantry_core::{AggregateFailure, Error, Result, TenantId};

/// Per-tenant outcome of a bulk operation
///
/// Every tenant the operation covered appears in exactly one of the
/// lists. Tenants that disappeared from the registry while the operation
/// ran are reported as skipped rather than failed.
#[derive(Debug)]
pub struct BulkOperationReport {
    pub operation: String,
    pub succeeded: Vec<TenantId>,
    pub skipped: Vec<TenantId>,
    pub failed: Vec<(TenantId, Error)>,
}

impl BulkOperationReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Build a report from individual results
    pub fn from_results(
        operation: impl Into<String>,
        results: impl IntoIterator<Item = (TenantId, Result<()>)>,
    ) -> Self {
        let mut report = Self::new(operation);
        for (tenant_id, result) in results {
            report.record(tenant_id, result);
        }
        report
    }

    pub fn record(&mut self, tenant_id: TenantId, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(tenant_id),
            Err(Error::NotFound(_)) => self.skipped.push(tenant_id),
            Err(e) => self.failed.push((tenant_id, e)),
        }
    }

    /// Number of tenants the operation covered
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Tenants whose individual operation failed
    pub fn failed_tenants(&self) -> impl Iterator<Item = &TenantId> {
        self.failed.iter().map(|(tenant_id, _)| tenant_id)
    }

    /// Convert into an error naming the failed tenants, if any failed
    pub fn into_result(self) -> Result<Vec<TenantId>> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        let attempted = self.attempted();
        Err(Error::AggregateFailure(AggregateFailure {
            operation: self.operation,
            attempted,
            failures: self.failed,
        }))
    }
}

impl fmt::Display for BulkOperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed, {} skipped",
            self.operation,
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len()
        )
    }
}
