//! In-memory configuration store for Tenantry
//!
//! This crate implements the `ConfigStore` trait on top of an in-process
//! map. Every write and delete is broadcast to watchers whose prefix
//! matches, which makes it the store of choice for tests and for
//! embedding the lifecycle manager in a single process.
//!
//! # Example
//! ```no_run
//! # use tenantry_config_memory::InMemoryConfigStore;
//! # use tenantry_core::ConfigStore;
//! # async fn example() -> tenantry_core::Result<()> {
//! let store = InMemoryConfigStore::new();
//! store.write("/tenants/acme/engine.yaml", "interval_secs: 5".into()).await?;
//! # Ok(())
//! # }
//! ```

mod memory_store;

pub use memory_store::InMemoryConfigStore;
