use crate::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "PRINT_AGENT_CONFIG";
const PORT_ENV: &str = "PRINT_AGENT_PORT";
const BIND_ENV: &str = "PRINT_AGENT_BIND";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub mdns_enabled: bool,
    pub service_name: String,
    pub service_domain: String,
    pub log_dir: Option<PathBuf>,
    /// File the settings were read from; `None` when running on defaults.
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8088,
            tls_cert_path: PathBuf::from("ssl/cert.pem"),
            tls_key_path: PathBuf::from("ssl/key.pem"),
            connect_timeout_ms: 3000,
            read_timeout_ms: 2000,
            write_timeout_ms: 5000,
            mdns_enabled: true,
            service_name: "Printer Server".to_string(),
            service_domain: "printer-server.local".to_string(),
            log_dir: None,
            loaded_from: None,
        }
    }
}

impl AppConfig {
    /// Default config file location per platform
    pub fn default_path() -> PathBuf {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::config_dir().map(|p| p.join("Local Print Agent"))
        } else {
            dirs::config_dir().map(|p| p.join("escpos-print-agent"))
        };

        config_dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.json")
    }

    /// `$PRINT_AGENT_CONFIG` if set, else the platform default.
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path)
    }

    /// Load from `config_path()`, then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_file(&Self::config_path())?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Read a JSON config file; a missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let mut config: Self = serde_json::from_str(&contents).map_err(|e| {
                    AgentError::Config(format!("{}: {}", path.display(), e))
                })?;
                config.loaded_from = Some(path.to_path_buf());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(AgentError::Config(format!("{}: {}", path.display(), e))),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.port = port
                .parse()
                .map_err(|_| AgentError::Config(format!("{} is not a port: {:?}", PORT_ENV, port)))?;
        }
        if let Ok(bind) = std::env::var(BIND_ENV) {
            self.bind_address = bind;
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn tls_files_present(&self) -> bool {
        self.tls_cert_path.is_file() && self.tls_key_path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::from_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.read_timeout_ms, 2000);
        assert_eq!(config.connect_timeout_ms, 3000);
        assert_eq!(config.loaded_from, None);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9443, "mdns_enabled": false}"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9443);
        assert!(!config.mdns_enabled);
        assert_eq!(config.service_name, "Printer Server");
        assert_eq!(config.loaded_from.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ port: ").unwrap();

        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(CONFIG_PATH_ENV, dir.path().join("none.json"));
        std::env::set_var(PORT_ENV, "8443");
        std::env::set_var(BIND_ENV, "127.0.0.1");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.listen_address(), "127.0.0.1:8443");
        assert_eq!(AppConfig::config_path(), dir.path().join("none.json"));

        std::env::set_var(PORT_ENV, "not-a-port");
        assert!(matches!(AppConfig::load(), Err(AgentError::Config(_))));

        std::env::remove_var(PORT_ENV);
        std::env::remove_var(BIND_ENV);
        std::env::remove_var(CONFIG_PATH_ENV);
    }

    #[test]
    fn test_tls_files_absent() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            tls_cert_path: dir.path().join("cert.pem"),
            tls_key_path: dir.path().join("key.pem"),
            ..AppConfig::default()
        };
        assert!(!config.tls_files_present());
    }
}
