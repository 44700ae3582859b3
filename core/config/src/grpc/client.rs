// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;
use std::time::Duration;

use display_error_chain::ErrorChainExt;
use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use tokio_retry::RetryIf;
use tonic::transport::{Channel, Endpoint, Uri};

use super::errors::ConfigError;
use crate::backoff::Strategy;
use crate::backoff::exponential::Config as ExponentialBackoff;
use crate::backoff::fixedinterval::Config as FixedIntervalBackoff;
use crate::component::configuration::Configuration;

/// Keepalive configuration for the client.
/// This struct contains the keepalive time for TCP and HTTP2,
/// the timeout duration for the keepalive, and whether to permit
/// keepalive without an active stream.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct KeepaliveConfig {
    /// The duration of the keepalive time for TCP
    #[serde(
        default = "default_tcp_keepalive",
        deserialize_with = "deserialize_duration"
    )]
    pub tcp_keepalive: Duration,

    /// The duration of the keepalive time for HTTP2
    #[serde(
        default = "default_http2_keepalive",
        deserialize_with = "deserialize_duration"
    )]
    pub http2_keepalive: Duration,

    /// The timeout duration for the keepalive
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Whether to permit keepalive without an active stream
    #[serde(default)]
    pub keep_alive_while_idle: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            tcp_keepalive: default_tcp_keepalive(),
            http2_keepalive: default_http2_keepalive(),
            timeout: default_timeout(),
            keep_alive_while_idle: false,
        }
    }
}

fn default_tcp_keepalive() -> Duration {
    Duration::from_secs(60)
}

fn default_http2_keepalive() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Reconnect strategy used while establishing the channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BackoffConfig {
    /// Exponential backoff retry config.
    Exponential(ExponentialBackoff),
    /// FixedInterval backoff retry config.
    FixedInterval(FixedIntervalBackoff),
}

impl BackoffConfig {
    pub fn new_exponential(
        base: u64,
        factor: u64,
        max_delay: Duration,
        max_attempts: usize,
        jitter: bool,
    ) -> Self {
        BackoffConfig::Exponential(ExponentialBackoff::new(
            base,
            factor,
            max_delay,
            max_attempts,
            jitter,
        ))
    }

    pub fn new_fixed_interval(interval: Duration, max_attempts: usize) -> Self {
        BackoffConfig::FixedInterval(FixedIntervalBackoff::new(interval, max_attempts))
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential(ExponentialBackoff::default())
    }
}

impl Strategy for BackoffConfig {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            BackoffConfig::Exponential(b) => b.get_strategy(),
            BackoffConfig::FixedInterval(b) => b.get_strategy(),
        }
    }
}

/// Struct for the client configuration.
/// The client configuration can be converted to a tonic channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClientConfig {
    /// The target the client will connect to, e.g. `http://127.0.0.1:46357`.
    pub endpoint: String,

    /// Timeout for the connection. Zero disables it.
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connect_timeout: Duration,

    /// Timeout per request. Zero disables it.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,

    /// Keepalive parameters.
    pub keepalive: Option<KeepaliveConfig>,

    /// Request buffer size.
    pub buffer_size: Option<usize>,

    /// Backoff retry configuration.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: String::new(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            keepalive: None,
            buffer_size: None,
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(0)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(0)
}

impl std::fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ClientConfig {{ endpoint: {}, connect_timeout: {:?}, request_timeout: {:?}, keepalive: {:?}, buffer_size: {:?}, backoff: {:?} }}",
            self.endpoint,
            self.connect_timeout,
            self.request_timeout,
            self.keepalive,
            self.buffer_size,
            self.backoff,
        )
    }
}

impl Configuration for ClientConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        self.parse_endpoint_uri().map(|_| ())
    }
}

impl ClientConfig {
    /// Creates a new client configuration with the given endpoint.
    /// This function will return a ClientConfig with the endpoint set
    /// and all other fields set to default.
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..self
        }
    }

    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            ..self
        }
    }

    pub fn with_keepalive(self, keepalive: KeepaliveConfig) -> Self {
        Self {
            keepalive: Some(keepalive),
            ..self
        }
    }

    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        Self {
            buffer_size: Some(buffer_size),
            ..self
        }
    }

    pub fn with_backoff(self, backoff: BackoffConfig) -> Self {
        Self { backoff, ..self }
    }

    /// Parses the endpoint string into a URI, only http and https are accepted.
    fn parse_endpoint_uri(&self) -> Result<Uri, ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        let uri = Uri::from_str(&self.endpoint)?;
        match uri.scheme_str() {
            Some("http") | Some("https") => Ok(uri),
            _ => Err(ConfigError::InvalidEndpointScheme),
        }
    }

    /// Creates the channel builder with all configuration settings
    fn create_channel_builder(&self, uri: Uri) -> Endpoint {
        let mut builder = Channel::builder(uri);

        if let Some(size) = self.buffer_size {
            builder = builder.buffer_size(size);
        }

        if !self.connect_timeout.is_zero() {
            builder = builder.connect_timeout(self.connect_timeout);
        }

        if !self.request_timeout.is_zero() {
            builder = builder.timeout(self.request_timeout);
        }

        if let Some(keepalive) = &self.keepalive {
            builder = builder
                .tcp_keepalive(Some(keepalive.tcp_keepalive))
                .keep_alive_timeout(keepalive.timeout)
                .keep_alive_while_idle(keepalive.keep_alive_while_idle)
                .http2_keep_alive_interval(keepalive.http2_keepalive);
        }

        builder
    }

    /// Converts the client configuration to a tonic channel, retrying transport
    /// errors according to the configured backoff strategy.
    pub async fn to_channel(&self) -> Result<Channel, ConfigError> {
        let uri = self.parse_endpoint_uri()?;
        let builder = self.create_channel_builder(uri.clone());

        RetryIf::spawn(
            self.backoff.get_strategy(),
            || {
                let builder = builder.clone();
                let uri = uri.clone();
                async move {
                    tracing::debug!(%uri, "attempting to create gRPC channel");
                    builder.connect().await.map_err(ConfigError::from)
                }
            },
            |e: &ConfigError| match e {
                ConfigError::TransportError(err) => {
                    tracing::warn!(error = %err.chain(), "transport error encountered, retrying");
                    true
                }
                _ => false,
            },
        )
        .await
    }
}
