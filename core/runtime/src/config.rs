// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use conduit_config::component::configuration::{Configuration, ConfigurationError};
use conduit_config::grpc::client::ClientConfig;
use conduit_config::grpc::server::ServerConfig;
use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

/// Where the context listens or what it connects to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportConfig {
    Server(ServerConfig),
    Client(ClientConfig),
}

impl TransportConfig {
    pub fn side(&self) -> Side {
        match self {
            TransportConfig::Server(_) => Side::Server,
            TransportConfig::Client(_) => Side::Client,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Server side: peers silent for longer than this are evicted.
    #[serde(
        default = "default_peer_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub peer_timeout: Duration,

    /// Server side: how often the eviction sweep runs.
    #[serde(
        default = "default_sweep_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub sweep_interval: Duration,

    /// Client side: how often a ping is sent.
    #[serde(
        default = "default_ping_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            peer_timeout: default_peer_timeout(),
            sweep_interval: default_sweep_interval(),
            ping_interval: default_ping_interval(),
        }
    }
}

fn default_peer_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Client side: pause between two poll requests.
    #[serde(default = "default_poll_interval", deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfiguration {
    /// Name used in the component identifier and in logs.
    #[serde(default = "default_name")]
    pub name: String,

    pub transport: TransportConfig,

    /// Name of the registered serializer.
    #[serde(default = "default_serializer")]
    pub serializer: String,

    /// Name of the registered adaptor provider.
    #[serde(default = "default_adaptor")]
    pub adaptor: String,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub poll: PollConfig,

    /// Server side: how long close waits for poll streams to finish.
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub drain_timeout: Duration,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_serializer() -> String {
    "json".to_string()
}

fn default_adaptor() -> String {
    "grpc".to_string()
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ContextConfiguration {
    pub fn server(config: ServerConfig) -> Self {
        Self::with_transport(TransportConfig::Server(config))
    }

    pub fn client(config: ClientConfig) -> Self {
        Self::with_transport(TransportConfig::Client(config))
    }

    fn with_transport(transport: TransportConfig) -> Self {
        ContextConfiguration {
            name: default_name(),
            transport,
            serializer: default_serializer(),
            adaptor: default_adaptor(),
            heartbeat: HeartbeatConfig::default(),
            poll: PollConfig::default(),
            drain_timeout: default_drain_timeout(),
        }
    }

    pub fn with_name(self, name: &str) -> Self {
        ContextConfiguration {
            name: name.to_string(),
            ..self
        }
    }

    pub fn with_serializer(self, serializer: &str) -> Self {
        ContextConfiguration {
            serializer: serializer.to_string(),
            ..self
        }
    }

    pub fn with_adaptor(self, adaptor: &str) -> Self {
        ContextConfiguration {
            adaptor: adaptor.to_string(),
            ..self
        }
    }

    pub fn with_heartbeat(self, heartbeat: HeartbeatConfig) -> Self {
        ContextConfiguration { heartbeat, ..self }
    }

    pub fn with_poll_interval(self, interval: Duration) -> Self {
        ContextConfiguration {
            poll: PollConfig { interval },
            ..self
        }
    }

    pub fn with_drain_timeout(self, drain_timeout: Duration) -> Self {
        ContextConfiguration {
            drain_timeout,
            ..self
        }
    }

    pub fn side(&self) -> Side {
        self.transport.side()
    }
}

impl Configuration for ContextConfiguration {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), Self::Error> {
        let transport = match &self.transport {
            TransportConfig::Server(server) => server.validate(),
            TransportConfig::Client(client) => client.validate(),
        };
        transport.map_err(|e| ConfigurationError::Invalid(e.to_string()))?;

        if self.heartbeat.peer_timeout.is_zero() {
            return Err(ConfigurationError::Invalid(
                "heartbeat.peer_timeout must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.sweep_interval.is_zero() || self.heartbeat.ping_interval.is_zero() {
            return Err(ConfigurationError::Invalid(
                "heartbeat intervals must be greater than zero".to_string(),
            ));
        }
        if self.poll.interval.is_zero() {
            return Err(ConfigurationError::Invalid(
                "poll.interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let yaml = r#"
transport:
  server:
    endpoint: "127.0.0.1:46357"
"#;
        let config: ContextConfiguration = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.name, "default");
        assert_eq!(config.side(), Side::Server);
        assert_eq!(config.serializer, "json");
        assert_eq!(config.adaptor, "grpc");
        assert_eq!(config.heartbeat, HeartbeatConfig::default());
        assert_eq!(config.poll.interval, Duration::from_millis(50));
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_overrides() {
        let yaml = r#"
name: edge
transport:
  client:
    endpoint: "http://127.0.0.1:46357"
serializer: yaml
heartbeat:
  ping_interval: 2s
poll:
  interval: 100ms
"#;
        let config: ContextConfiguration = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.name, "edge");
        assert_eq!(config.side(), Side::Client);
        assert_eq!(config.serializer, "yaml");
        assert_eq!(config.heartbeat.ping_interval, Duration::from_secs(2));
        assert_eq!(config.heartbeat.peer_timeout, Duration::from_secs(30));
        assert_eq!(config.poll.interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let config = ContextConfiguration::client(ClientConfig::with_endpoint("tcp://nowhere"));
        assert!(config.validate().is_err());

        let config = ContextConfiguration::server(ServerConfig::with_endpoint("127.0.0.1:0"))
            .with_poll_interval(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::Invalid(
                "poll.interval must be greater than zero".to_string()
            ))
        );
    }
}
