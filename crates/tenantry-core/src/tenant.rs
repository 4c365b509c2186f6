//! Tenant identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Maximum accepted length of a tenant identifier
const MAX_TENANT_ID_LEN: usize = 128;

/// Unique identifier for a tenant.
///
/// Identifiers are opaque to the lifecycle manager but appear as one
/// segment of a configuration store path, so they are restricted to
/// ASCII alphanumerics, `-`, `_` and `.` (and may not be `.` or `..`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Create a new random tenant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a tenant ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }

    /// Parse and validate a tenant ID
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidTenant("tenant ID is empty".to_string()));
        }
        if s.len() > MAX_TENANT_ID_LEN {
            return Err(Error::InvalidTenant(format!(
                "tenant ID exceeds {} characters",
                MAX_TENANT_ID_LEN
            )));
        }
        if s == "." || s == ".." {
            return Err(Error::InvalidTenant(format!("'{}' is reserved", s)));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(Error::InvalidTenant(format!(
                "invalid character {:?} in tenant ID '{}'",
                c, s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
