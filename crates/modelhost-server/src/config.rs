//! Server configuration
//!
//! Layered with the `config` crate: built-in defaults, then the YAML file,
//! then `MODELHOST__*` environment variables (for example
//! `MODELHOST__SERVER__PORT=9000`), then command-line overrides.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file, read only when present
pub const DEFAULT_CONFIG_FILE: &str = "modelhost.yaml";

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Models registered at startup
    #[serde(default)]
    pub preload: Vec<PreloadModel>,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum request body size in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            body_limit: default_body_limit(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; stdout when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
        }
    }
}

/// A model to register when the server starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadModel {
    pub model_name: String,
    pub model_dir: PathBuf,
    #[serde(default)]
    pub force_reload: bool,
}

/// Command-line values that take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub verbose: bool,
}

impl ServerConfig {
    /// Load configuration from defaults, file, environment and CLI overrides.
    ///
    /// A missing file is an error only when it was named explicitly.
    pub fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let (path, required) = match config_path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let settings = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml).required(required))
            .add_source(
                Environment::with_prefix("MODELHOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: ServerConfig = settings.try_deserialize()?;
        config.apply(overrides);
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(listen) = &overrides.listen {
            self.server.listen = listen.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if overrides.verbose {
            self.logging.level = "modelhost=debug,tower_http=debug".to_string();
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.listen, self.server.port)
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

fn default_log_level() -> String {
    "modelhost=info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(ServerConfig::load(Some(&missing), &ConfigOverrides::default()).is_err());

        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "modelhost=info");
        assert!(config.preload.is_empty());
    }

    #[test]
    fn test_yaml_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelhost.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 9100
logging:
  dir: /var/log/modelhost
preload:
  - model_name: chat
    model_dir: plugins/chitchat
"#,
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.listen, "0.0.0.0");
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/modelhost")));
        assert_eq!(config.preload.len(), 1);
        assert!(!config.preload[0].force_reload);

        let overrides = ConfigOverrides {
            listen: Some("127.0.0.1".to_string()),
            port: Some(7000),
            verbose: true,
        };
        let config = ServerConfig::load(Some(&path), &overrides).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:7000");
        assert!(config.logging.level.contains("debug"));
    }
}
