//! # drift-config
//!
//! Configuration for drift filesystem components.
//!
//! Loads configuration from:
//! 1. `~/.driftfs/config.toml` (global)
//! 2. `./driftfs.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Well-known naming server ports. Storage servers default to
/// system-chosen ports; the naming server must be findable.
pub const DEFAULT_SERVICE_PORT: u16 = 6000;
pub const DEFAULT_REGISTRATION_PORT: u16 = 6001;

/// Shared reads of a file before the naming server replicates it.
pub const DEFAULT_READ_THRESHOLD: u32 = 20;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub naming: NamingConfig,
    pub storage: StorageConfig,
    pub replication: ReplicationConfig,
}

impl Config {
    /// Load config from the standard locations.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.driftfs/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Project config (./driftfs.toml)
        let project_path = Path::new("driftfs.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            config = toml::from_str(&contents)?;
        }

        // 3. Environment overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Load config from an explicit file, still honoring env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Global config path: ~/.driftfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".driftfs/config.toml"))
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DRIFT_NAMING_HOST") {
            self.naming.host = host;
        }
        if let Ok(port) = std::env::var("DRIFT_SERVICE_PORT") {
            if let Ok(n) = port.parse() {
                self.naming.service_port = n;
            }
        }
        if let Ok(port) = std::env::var("DRIFT_REGISTRATION_PORT") {
            if let Ok(n) = port.parse() {
                self.naming.registration_port = n;
            }
        }
        if let Ok(root) = std::env::var("DRIFT_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Ok(hostname) = std::env::var("DRIFT_HOSTNAME") {
            self.storage.hostname = hostname;
        }
        if let Ok(port) = std::env::var("DRIFT_CLIENT_PORT") {
            if let Ok(n) = port.parse() {
                self.storage.client_port = n;
            }
        }
        if let Ok(port) = std::env::var("DRIFT_COMMAND_PORT") {
            if let Ok(n) = port.parse() {
                self.storage.command_port = n;
            }
        }
        if let Ok(threshold) = std::env::var("DRIFT_READ_THRESHOLD") {
            if let Ok(n) = threshold.parse() {
                self.replication.read_threshold = n;
            }
        }
    }

    // ========== Convenience Accessors ==========

    /// Address the naming server binds its service interface to.
    pub fn service_addr(&self) -> String {
        format!("{}:{}", self.naming.host, self.naming.service_port)
    }

    /// Address the naming server binds its registration interface to.
    pub fn registration_addr(&self) -> String {
        format!("{}:{}", self.naming.host, self.naming.registration_port)
    }

    /// Generate a config TOML template for new deployments.
    pub fn init_toml() -> String {
        let default = Config::default();
        format!(
            r#"# drift filesystem configuration

[naming]
host = "{host}"
service_port = {service_port}
registration_port = {registration_port}

[storage]
root = "{root}"
hostname = "{hostname}"
# client_port = 0    # 0 = system-chosen
# command_port = 0   # 0 = system-chosen

[replication]
read_threshold = {read_threshold}
"#,
            host = default.naming.host,
            service_port = default.naming.service_port,
            registration_port = default.naming.registration_port,
            root = default.storage.root.display(),
            hostname = default.storage.hostname,
            read_threshold = default.replication.read_threshold,
        )
    }
}

/// Naming server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Interface to bind both naming skeletons on
    pub host: String,
    /// Well-known port of the client service interface
    pub service_port: u16,
    /// Well-known port of the storage registration interface
    pub registration_port: u16,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            service_port: DEFAULT_SERVICE_PORT,
            registration_port: DEFAULT_REGISTRATION_PORT,
        }
    }
}

/// Storage server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory whose contents this storage server exposes
    pub root: PathBuf,
    /// Externally-routable hostname handed to the naming server
    pub hostname: String,
    /// Port of the client (Storage) interface, 0 = system-chosen
    pub client_port: u16,
    /// Port of the naming-server (Command) interface, 0 = system-chosen
    pub command_port: u16,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./storage"),
            hostname: "127.0.0.1".to_string(),
            client_port: 0,
            command_port: 0,
        }
    }
}

/// Replication policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Shared reads of a file before a new replica is created
    pub read_threshold: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            read_threshold: DEFAULT_READ_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lock for tests that modify environment variables to prevent race
    // conditions when tests run in parallel
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn default_config_uses_well_known_ports() {
        let config = Config::default();
        assert_eq!(config.naming.service_port, 6000);
        assert_eq!(config.naming.registration_port, 6001);
        assert_eq!(config.storage.client_port, 0);
        assert_eq!(config.storage.command_port, 0);
        assert_eq!(config.replication.read_threshold, 20);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[naming]
service_port = 7100
"#;
        let config: Config = toml::from_str(partial).unwrap();
        assert_eq!(config.naming.service_port, 7100);
        assert_eq!(config.naming.registration_port, 6001);
        assert_eq!(config.storage.hostname, "127.0.0.1");
    }

    #[test]
    fn toml_round_trip_preserves_values() {
        let mut original = Config::default();
        original.storage.root = PathBuf::from("/srv/drift");
        original.replication.read_threshold = 5;

        let rendered = toml::to_string(&original).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed.storage.root, PathBuf::from("/srv/drift"));
        assert_eq!(parsed.replication.read_threshold, 5);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driftfs.toml");
        std::fs::write(
            &path,
            r#"
[storage]
root = "/data/blob"
hostname = "storage-3.internal"
client_port = 7200
"#,
        )
        .unwrap();

        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/data/blob"));
        assert_eq!(config.storage.hostname, "storage-3.internal");
        assert_eq!(config.storage.client_port, 7200);
    }

    #[test]
    fn env_overrides_win() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();

        std::env::set_var("DRIFT_SERVICE_PORT", "9100");
        std::env::set_var("DRIFT_READ_THRESHOLD", "3");
        config.apply_env_overrides();
        std::env::remove_var("DRIFT_SERVICE_PORT");
        std::env::remove_var("DRIFT_READ_THRESHOLD");

        assert_eq!(config.naming.service_port, 9100);
        assert_eq!(config.replication.read_threshold, 3);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();

        std::env::set_var("DRIFT_SERVICE_PORT", "not_a_port");
        config.apply_env_overrides();
        std::env::remove_var("DRIFT_SERVICE_PORT");

        assert_eq!(config.naming.service_port, DEFAULT_SERVICE_PORT);
    }

    #[test]
    fn init_toml_parses_back() {
        let config: Config = toml::from_str(&Config::init_toml()).unwrap();
        assert_eq!(config.naming.service_port, DEFAULT_SERVICE_PORT);
    }
}
