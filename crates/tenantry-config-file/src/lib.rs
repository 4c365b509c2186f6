//! Directory-backed configuration store for Tenantry
//!
//! This crate implements the `ConfigStore` trait on top of a directory
//! tree. Each store path maps to a file below the store root, so the
//! tenant configuration `/tenants/acme/engine.yaml` lives at
//! `<root>/tenants/acme/engine.yaml`.
//!
//! # Features
//! - Atomic replacement of configuration files
//! - Real-time change notifications with `notify`
//! - Prefix listing for startup reconciliation
//!
//! # Example
//! ```no_run
//! # use tenantry_config_file::FileConfigStore;
//! # use tenantry_core::ConfigStore;
//! # async fn example() -> tenantry_core::Result<()> {
//! let store = FileConfigStore::new("~/.tenantry/store").await?;
//! let paths = store.list("/tenants").await?;
//! # Ok(())
//! # }
//! ```

mod file_store;

pub use file_store::FileConfigStore;
