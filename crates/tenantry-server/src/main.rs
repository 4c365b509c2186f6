//! Tenantry Server
//!
//! Hosts one engine per tenant and keeps each in line with the tenant's
//! configuration in a watched directory:
//! - Existing tenant configurations are applied at startup
//! - Added, updated and deleted configurations start, reconfigure or
//!   remove the tenant's engine
//! - `/healthz`, `/readyz` and `/metrics` report on the service
//!
//! Usage:
//! ```bash
//! # Serve with a config file
//! tenantry-server --config tenantry.yaml
//!
//! # Write a tenant's configuration into the watched store
//! tenantry-server put-config --tenant acme --file acme.yaml
//! ```

mod app;
mod config;
mod heartbeat;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use app::TenantHost;
use config::ServerConfig;
use heartbeat::HeartbeatEngineFactory;
use tenantry_config_file::FileConfigStore;
use tenantry_core::{CancellationToken, ConfigStore, TenantId};
use tenantry_engine::TenantPathResolver;
use tenantry_observability::{HealthState, Metrics, health_router, init_logging};

/// Tenantry Server - per-tenant engine host
#[derive(Parser)]
#[command(name = "tenantry-server")]
#[command(about = "Hosts and reconciles per-tenant engines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "TENANTRY_CONFIG",
        global = true
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service (default if no command specified)
    Serve,
    /// Print the effective configuration and exit
    CheckConfig,
    /// Write a tenant's configuration into the store
    PutConfig {
        /// Tenant identifier
        #[arg(long)]
        tenant: String,

        /// File holding the configuration payload
        #[arg(long)]
        file: PathBuf,
    },
    /// Print a tenant's configuration from the store
    GetConfig {
        /// Tenant identifier
        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.merge_env();
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::PutConfig { tenant, file } => put_config(&config, &tenant, &file).await,
        Commands::GetConfig { tenant } => get_config(&config, &tenant).await,
    }
}

async fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<FileConfigStore>> {
    let store = FileConfigStore::new(&config.store.directory)
        .await
        .with_context(|| format!("Failed to open store at {}", config.store.directory))?;
    Ok(Arc::new(store))
}

async fn put_config(config: &ServerConfig, tenant: &str, file: &PathBuf) -> anyhow::Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let paths = TenantPathResolver::new(&config.lifecycle.paths)?;
    let path = paths.configuration_path(&tenant_id);
    open_store(config).await?.write(&path, data.into()).await?;
    println!("Wrote {}", path);
    Ok(())
}

async fn get_config(config: &ServerConfig, tenant: &str) -> anyhow::Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let paths = TenantPathResolver::new(&config.lifecycle.paths)?;
    let path = paths.configuration_path(&tenant_id);

    match open_store(config).await?.read(&path).await? {
        Some(data) => {
            print!("{}", String::from_utf8_lossy(&data));
            Ok(())
        }
        None => anyhow::bail!("No configuration for tenant {} at {}", tenant_id, path),
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting tenantry-server");
    info!(
        store = %config.store.directory,
        root = %config.lifecycle.paths.root,
        config_name = %config.lifecycle.paths.config_name,
        "Configuration store"
    );

    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);
    let store = open_store(&config).await?;
    let host = TenantHost::start(
        store,
        Arc::new(HeartbeatEngineFactory),
        config.lifecycle.clone(),
        Some(metrics.clone()),
    )
    .await?;

    let shutdown = CancellationToken::new();
    let health = if config.health.enabled {
        let state = HealthState::new(metrics).with_readiness(host.readiness.clone());
        let addr: SocketAddr = format!("{}:{}", config.health.host, config.health.port)
            .parse()
            .context("Invalid health listener address")?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health listener on {}", addr))?;

        info!("Observability:");
        info!("   - Health check:       http://{}/healthz", addr);
        info!("   - Readiness check:    http://{}/readyz", addr);
        info!("   - Prometheus metrics: http://{}/metrics", addr);

        let stop = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, health_router(state))
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        }))
    } else {
        None
    };

    shutdown_signal().await;
    shutdown.cancel();

    let report = host.shutdown().await;
    if report.is_success() {
        info!("{}", report);
    } else {
        warn!("{}", report);
    }

    if let Some(health) = health {
        match health.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Health server error"),
            Err(e) => warn!(error = %e, "Health server task failed"),
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
