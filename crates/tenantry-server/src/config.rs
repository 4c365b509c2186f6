use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use tenantry_engine::ManagerConfig;
use tenantry_observability::LoggingConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub lifecycle: ManagerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory mirrored by the file-backed configuration store
    #[serde(default = "default_store_dir")]
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_dir(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("TENANTRY_STORE_DIR") {
            self.store.directory = val;
        }

        if let Ok(val) = std::env::var("TENANTRY_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("TENANTRY_LOG_JSON") {
            match val.parse::<bool>() {
                Ok(json) => self.logging.json = json,
                Err(_) => eprintln!("Warning: Invalid TENANTRY_LOG_JSON '{}', ignoring", val),
            }
        }

        if let Ok(val) = std::env::var("TENANTRY_HEALTH_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.health.port = port,
                Err(_) => eprintln!("Warning: Invalid TENANTRY_HEALTH_PORT '{}', ignoring", val),
            }
        }

        if let Ok(val) = std::env::var("TENANTRY_ASSURE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => self.lifecycle.assure_timeout_secs = secs,
                Err(_) => eprintln!(
                    "Warning: Invalid TENANTRY_ASSURE_TIMEOUT_SECS '{}', ignoring",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.directory.trim().is_empty() {
            anyhow::bail!("store.directory must not be empty");
        }
        self.lifecycle.validate()?;
        Ok(())
    }
}

fn default_store_dir() -> String {
    "~/.tenantry/store".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_VARS: [&str; 5] = [
        "TENANTRY_STORE_DIR",
        "TENANTRY_LOG_LEVEL",
        "TENANTRY_LOG_JSON",
        "TENANTRY_HEALTH_PORT",
        "TENANTRY_ASSURE_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.store.directory, "~/.tenantry/store");
        assert_eq!(config.lifecycle.assure_timeout_secs, 30);
        assert!(config.health.enabled);
        assert_eq!(config.health.port, 9090);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "store:\n  directory: /var/lib/tenantry\nlifecycle:\n  assure_timeout_secs: 5\n  paths:\n    config_name: heartbeat.yaml\nlogging:\n  json: true"
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.directory, "/var/lib/tenantry");
        assert_eq!(config.lifecycle.assure_timeout_secs, 5);
        assert_eq!(config.lifecycle.paths.config_name, "heartbeat.yaml");
        assert_eq!(config.lifecycle.paths.root, "/tenants");
        assert!(config.logging.json);
        assert_eq!(config.health.port, 9090);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[health]\nenabled = false\nport = 8000\n\n[lifecycle]\nmax_concurrent_operations = 4"
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(!config.health.enabled);
        assert_eq!(config.health.port, 8000);
        assert_eq!(config.lifecycle.max_concurrent_operations, 4);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "lifecycle: [not, a, map]").unwrap();

        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid YAML"));
    }

    #[test]
    #[serial]
    fn test_merge_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("TENANTRY_STORE_DIR", "/srv/tenants");
            std::env::set_var("TENANTRY_LOG_LEVEL", "debug");
            std::env::set_var("TENANTRY_LOG_JSON", "true");
            std::env::set_var("TENANTRY_HEALTH_PORT", "9191");
            std::env::set_var("TENANTRY_ASSURE_TIMEOUT_SECS", "12");
        }

        let mut config = ServerConfig::default();
        config.merge_env();
        clear_env();

        assert_eq!(config.store.directory, "/srv/tenants");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.health.port, 9191);
        assert_eq!(config.lifecycle.assure_timeout_secs, 12);
    }

    #[test]
    #[serial]
    fn test_merge_env_ignores_invalid_values() {
        clear_env();
        unsafe {
            std::env::set_var("TENANTRY_HEALTH_PORT", "not-a-port");
            std::env::set_var("TENANTRY_ASSURE_TIMEOUT_SECS", "-1");
        }

        let mut config = ServerConfig::default();
        config.merge_env();
        clear_env();

        assert_eq!(config.health.port, 9090);
        assert_eq!(config.lifecycle.assure_timeout_secs, 30);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ServerConfig::default();
        config.lifecycle.assure_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
