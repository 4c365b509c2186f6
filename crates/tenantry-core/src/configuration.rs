//! Tenant configuration payloads and their versions

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque token identifying a configuration payload.
///
/// Derived from the payload bytes (hex SHA-256), so replayed or
/// duplicated deliveries of the same payload carry the same version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigVersion(String);

impl ConfigVersion {
    /// Derive the version of a payload
    pub fn of(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tenant configuration payload together with the store path it was
/// read from and its derived version.
///
/// The payload format belongs to the hosted engine; the lifecycle
/// manager never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantConfiguration {
    pub path: String,
    pub data: Bytes,
    pub version: ConfigVersion,
}

impl TenantConfiguration {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let version = ConfigVersion::of(&data);
        Self {
            path: path.into(),
            data,
            version,
        }
    }
}
