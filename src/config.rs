/// Configuration for the syngraph server.
///
/// Loaded from a YAML file passed with `-c/--config`; every field has a
/// default so an empty file (or none at all) yields a working local server.
///
/// ```yaml
/// server:
///   host: 127.0.0.1
///   port: 9000
///   model: graph        # graph | filesystem | chat
/// ```
use crate::chat::ChatModel;
use crate::error::{GraphError, GraphResult};
use crate::fs::FsModel;
use crate::session::{GraphModel, SessionModel};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which session model the server hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// The collaborative graph session.
    #[default]
    Graph,
    /// The filesystem materializer session.
    Filesystem,
    /// The name-tagged broadcast session.
    Chat,
}

/// The `server` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Session model to host.
    pub model: ModelKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            model: ModelKind::Graph,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The server section.
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> GraphResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GraphError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| GraphError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// The bind address, `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Instantiate the configured session model.
    pub fn build_model(&self) -> Box<dyn SessionModel> {
        match self.server.model {
            ModelKind::Graph => Box::new(GraphModel::new()),
            ModelKind::Filesystem => Box::new(FsModel::new()),
            ModelKind::Chat => Box::new(ChatModel::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.model, ModelKind::Graph);
        assert_eq!(config.addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = "server:\n  host: 0.0.0.0\n  port: 8765\n  model: filesystem\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.server.model, ModelKind::Filesystem);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let yaml = "server:\n  port: 7000\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.model, ModelKind::Graph);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/definitely/not/here.yaml");
        assert!(matches!(result, Err(GraphError::Config(_))));
    }
}
