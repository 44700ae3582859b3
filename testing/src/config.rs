// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use conduit_config::component::configuration::Configuration;
use conduit_runtime::ContextConfiguration;
use conduit_tracing::TracingConfiguration;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("yaml parse error")]
    YamlError(#[from] serde_yaml::Error),
    #[error("invalid context configuration")]
    InvalidContext(#[from] conduit_config::component::configuration::ConfigurationError),
}

/// Layout of the files read by the demo binaries.
///
/// ```yaml
/// tracing:
///   log_level: debug
/// context:
///   name: directory
///   transport:
///     server:
///       endpoint: 0.0.0.0:46400
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub tracing: TracingConfiguration,
    pub context: ContextConfiguration,
}

impl DemoConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: DemoConfig = serde_yaml::from_str(text)?;
        config.context.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_runtime::Side;

    use super::*;

    #[test]
    fn test_parse_server() {
        let config = DemoConfig::parse(
            r#"
tracing:
  log_level: debug
context:
  name: directory
  transport:
    server:
      endpoint: 127.0.0.1:0
  heartbeat:
    peer_timeout: 5s
"#,
        )
        .unwrap();

        assert_eq!(config.tracing.log_level(), "debug");
        assert_eq!(config.context.name, "directory");
        assert_eq!(config.context.side(), Side::Server);
        assert_eq!(config.context.heartbeat.peer_timeout, Duration::from_secs(5));
        assert_eq!(config.context.serializer, "json");
    }

    #[test]
    fn test_parse_rejects_invalid_context() {
        let res = DemoConfig::parse(
            r#"
context:
  transport:
    client:
      endpoint: http://127.0.0.1:46400
  poll:
    interval: 0s
"#,
        );
        assert!(matches!(res, Err(ConfigError::InvalidContext(_))));

        let res = DemoConfig::parse("tracing: {}\n");
        assert!(matches!(res, Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_shipped_configs_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        let server = DemoConfig::load(dir.join("server.yaml")).unwrap();
        assert_eq!(server.context.side(), Side::Server);
        let client = DemoConfig::load(dir.join("client.yaml")).unwrap();
        assert_eq!(client.context.side(), Side::Client);

        assert!(matches!(
            DemoConfig::load(dir.join("missing.yaml")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
