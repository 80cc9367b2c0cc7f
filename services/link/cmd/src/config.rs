//! Configuration handling for the viewer link client.
//!
//! Settings come from an optional YAML file, then environment variables,
//! then command-line flags (applied by `main`).

use anyhow::{Context, Result};
use link_schema::TargetType;
use link_session::{ClientConfig, ConnectionConfig};
use link_wire::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the server address
pub const ENV_SERVER: &str = "VIEWER_LINK_SERVER";
/// Environment variable overriding the instance id
pub const ENV_INSTANCE_ID: &str = "VIEWER_LINK_INSTANCE_ID";
/// Environment variable overriding the request timeout
pub const ENV_TIMEOUT: &str = "VIEWER_LINK_TIMEOUT";

/// Viewer link client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Server address, `host:port`
    pub server: String,
    /// Session id; generated per run when unset
    pub instance_id: Option<String>,
    /// Sender class stamped on commands
    pub client_type: TargetType,
    /// Reply timeout
    #[serde(with = "human_duration")]
    pub timeout: Duration,
    /// TCP connect timeout
    #[serde(with = "human_duration")]
    pub connect_timeout: Duration,
    /// Largest frame accepted or sent
    pub max_frame_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:7000".to_string(),
            instance_id: None,
            client_type: TargetType::Web,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    link: Option<LinkConfig>,
}

impl LinkConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Link configuration: server={}, timeout={}, connect_timeout={}",
            config.server,
            humantime::format_duration(config.timeout),
            humantime::format_duration(config.connect_timeout)
        );
        Ok(config)
    }

    /// Read the `link` section of a YAML file; a missing file yields defaults
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {:?} not found, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file {:?}", path))
            }
        };

        let root: RootConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(root.link.unwrap_or_default())
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup(ENV_SERVER) {
            info!("Server overridden by environment: {}", server);
            self.server = server;
        }

        if let Some(instance_id) = lookup(ENV_INSTANCE_ID) {
            info!("Instance id overridden by environment: {}", instance_id);
            self.instance_id = Some(instance_id);
        }

        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            self.timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid {} value '{}'", ENV_TIMEOUT, timeout))?;
            info!("Timeout overridden by environment: {}", timeout);
        }

        Ok(())
    }

    /// Settings for [`link_session::Client::connect`]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connection: ConnectionConfig {
                addr: self.server.clone(),
                connect_timeout: self.connect_timeout,
                max_frame_size: self.max_frame_size,
                ..ConnectionConfig::default()
            },
            instance_id: self.instance_id.clone(),
            client_type: self.client_type,
            request_timeout: Some(self.timeout),
        }
    }
}

/// Serde adapter for human-readable durations such as `30s` or `1m 30s`
mod human_duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.server, "127.0.0.1:7000");
        assert_eq!(config.instance_id, None);
        assert_eq!(config.client_type, TargetType::Web);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
link:
  server: viewer-backend:9100
  instance_id: notebook-7
  client_type: PYTHON
  timeout: 1m 30s
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.server, "viewer-backend:9100");
        assert_eq!(config.instance_id.as_deref(), Some("notebook-7"));
        assert_eq!(config.client_type, TargetType::Python);
        assert_eq!(config.timeout, Duration::from_secs(90));
        // unspecified fields keep their defaults
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LinkConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"link:\n  timeout: soon\n")
            .unwrap();
        assert!(LinkConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SERVER, "10.0.0.5:7000"),
            (ENV_INSTANCE_ID, "from-env"),
            (ENV_TIMEOUT, "250ms"),
        ]
        .into_iter()
        .collect();

        let mut config = LinkConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server, "10.0.0.5:7000");
        assert_eq!(config.instance_id.as_deref(), Some("from-env"));
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_timeout_override() {
        let mut config = LinkConfig::default();
        let result = config.apply_overrides(|key| (key == ENV_TIMEOUT).then(|| "later".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_client_config() {
        let config = LinkConfig {
            server: "host:1".to_string(),
            timeout: Duration::from_secs(3),
            ..LinkConfig::default()
        };
        let client = config.client_config();
        assert_eq!(client.connection.addr, "host:1");
        assert_eq!(client.request_timeout, Some(Duration::from_secs(3)));
        assert_eq!(client.client_type, TargetType::Web);
    }
}
