//! Mapping between tenants and configuration store paths
//!
//! A tenant's configuration lives at `{root}/{tenant_id}/{config_name}`.
//! Other files below `{root}/{tenant_id}/` belong to other services
//! sharing the store and are not this manager's concern.

use serde::{Deserialize, Serialize};

use tenantry_core::{Error, Result, TenantId, config_store::normalize_path};

/// Configuration path layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    /// Store prefix holding one directory per tenant
    #[serde(default = "default_root")]
    pub root: String,

    /// Name of this service's configuration file in a tenant directory
    #[serde(default = "default_config_name")]
    pub config_name: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            config_name: default_config_name(),
        }
    }
}

fn default_root() -> String {
    "/tenants".to_string()
}

fn default_config_name() -> String {
    "engine.yaml".to_string()
}

impl PathConfig {
    pub fn validate(&self) -> Result<()> {
        normalize_path(&self.root)
            .map_err(|e| Error::Config(format!("Invalid paths.root: {}", e)))?;

        let name = self.config_name.as_str();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(Error::Config(format!(
                "Invalid paths.config_name '{}': must be a single path segment",
                name
            )));
        }
        Ok(())
    }
}

/// Resolves tenants from configuration paths and back
#[derive(Debug, Clone)]
pub struct TenantPathResolver {
    root: String,
    config_name: String,
}

impl TenantPathResolver {
    pub fn new(config: &PathConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            root: normalize_path(&config.root)?,
            config_name: config.config_name.clone(),
        })
    }

    /// Normalized prefix below which tenant configurations live
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Store path of a tenant's configuration
    pub fn configuration_path(&self, tenant_id: &TenantId) -> String {
        format!("{}/{}/{}", self.root, tenant_id, self.config_name)
    }

    /// Tenant whose configuration is stored at `path`
    ///
    /// Returns `None` for paths outside the root, for other services'
    /// files and for directory names that are not valid tenant ids.
    pub fn resolve(&self, path: &str) -> Option<TenantId> {
        let path = normalize_path(path).ok()?;
        let rest = path.strip_prefix(&self.root)?.strip_prefix('/')?;
        let (tenant, name) = rest.split_once('/')?;
        if name != self.config_name {
            return None;
        }
        TenantId::parse(tenant).ok()
    }
}
