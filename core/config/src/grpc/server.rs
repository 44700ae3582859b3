// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use display_error_chain::ErrorChainExt;
use duration_str::deserialize_duration;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::errors::ConfigError;
use crate::component::configuration::Configuration;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct KeepaliveServerParameters {
    /// max_connection_age sets the maximum amount of time a connection may exist before it will be closed.
    #[serde(
        default = "default_max_connection_age",
        deserialize_with = "deserialize_duration"
    )]
    pub max_connection_age: Duration,

    /// Time sets the frequency of the keepalive ping.
    #[serde(default = "default_time", deserialize_with = "deserialize_duration")]
    pub time: Duration,

    /// Timeout sets the amount of time the server waits for a keepalive ping ack.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ServerConfig {
    /// Endpoint is the address to listen on.
    pub endpoint: String,

    /// Maximum size (in MiB) of frames accepted by the server.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: Option<u32>,

    /// MaxConcurrentStreams sets the limit on the number of concurrent streams to each ServerTransport.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: Option<u32>,

    /// Keepalive anchor for all the settings related to keepalive.
    #[serde(default)]
    pub keepalive: KeepaliveServerParameters,
}

impl Default for KeepaliveServerParameters {
    fn default() -> Self {
        Self {
            max_connection_age: default_max_connection_age(),
            time: default_time(),
            timeout: default_timeout(),
        }
    }
}

fn default_max_connection_age() -> Duration {
    Duration::from_secs(2 * 3600)
}

fn default_time() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_max_frame_size() -> Option<u32> {
    Some(4)
}

fn default_max_concurrent_streams() -> Option<u32> {
    Some(100)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_frame_size: default_max_frame_size(),
            max_concurrent_streams: default_max_concurrent_streams(),
            keepalive: KeepaliveServerParameters::default(),
        }
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ServerConfig {{ endpoint: {}, max_frame_size: {:?}, max_concurrent_streams: {:?}, keepalive: {:?} }}",
            self.endpoint, self.max_frame_size, self.max_concurrent_streams, self.keepalive,
        )
    }
}

impl Configuration for ServerConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        SocketAddr::from_str(self.endpoint.as_str())?;

        if self.max_frame_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_size",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// ServerFuture is a type alias for a boxed future that returns a Result<(), tonic::transport::Error>.
type ServerFuture = Pin<Box<dyn Future<Output = Result<(), tonic::transport::Error>> + Send>>;

impl ServerConfig {
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    pub fn with_max_frame_size(self, max_frame_size: Option<u32>) -> Self {
        Self {
            max_frame_size,
            ..self
        }
    }

    pub fn with_max_concurrent_streams(self, max_concurrent_streams: Option<u32>) -> Self {
        Self {
            max_concurrent_streams,
            ..self
        }
    }

    pub fn with_keepalive(self, keepalive: KeepaliveServerParameters) -> Self {
        Self { keepalive, ..self }
    }

    /// Address parsed from the configured endpoint.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        Ok(SocketAddr::from_str(self.endpoint.as_str())?)
    }

    /// Bind a listener on the configured endpoint. Port 0 picks an ephemeral port,
    /// use `TcpListener::local_addr` to read it back.
    pub async fn bind(&self) -> Result<TcpListener, ConfigError> {
        let addr = self.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        debug!(local = ?listener.local_addr().ok(), "listener bound");
        Ok(listener)
    }

    fn create_server_builder(&self) -> tonic::transport::Server {
        let builder: tonic::transport::Server =
            tonic::transport::Server::builder().accept_http1(false);

        let builder = match self.max_concurrent_streams {
            Some(max_concurrent_streams) => {
                builder.concurrency_limit_per_connection(max_concurrent_streams as usize)
            }
            None => builder,
        };

        let builder = match self.max_frame_size {
            Some(max_frame_size) => builder.max_frame_size(max_frame_size * 1024 * 1024),
            None => builder,
        };

        let builder = builder.http2_keepalive_interval(Some(self.keepalive.time));
        let builder = builder.http2_keepalive_timeout(Some(self.keepalive.timeout));

        builder.max_connection_age(self.keepalive.max_connection_age)
    }

    /// Build the server future. Once `signal` completes the server stops accepting
    /// connections and resolves when the open ones have finished.
    pub fn to_server_future<S, F>(
        &self,
        svc: &[S],
        listener: TcpListener,
        signal: F,
    ) -> Result<ServerFuture, ConfigError>
    where
        S: tower_service::Service<
                http::Request<tonic::body::Body>,
                Response = http::Response<tonic::body::Body>,
                Error = Infallible,
            >
            + tonic::server::NamedService
            + Clone
            + Send
            + 'static
            + Sync,
        S::Future: Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let (first, rest) = svc.split_first().ok_or(ConfigError::MissingServices)?;

        let mut builder = self.create_server_builder();
        let mut router = builder.add_service(first.clone());
        for s in rest {
            router = router.add_service(s.clone());
        }

        let incoming = TcpListenerStream::new(listener);
        Ok(router.serve_with_incoming_shutdown(incoming, signal).boxed())
    }

    /// Spawn the server acceptor. When the drain signal fires the server shuts down
    /// gracefully and holds the drain until its connections are closed. Cancelling
    /// the returned token stops it immediately.
    pub fn run_server<S>(
        &self,
        svc: &[S],
        listener: TcpListener,
        drain_rx: drain::Watch,
    ) -> Result<CancellationToken, ConfigError>
    where
        S: tower_service::Service<
                http::Request<tonic::body::Body>,
                Response = http::Response<tonic::body::Body>,
                Error = Infallible,
            >
            + tonic::server::NamedService
            + Clone
            + Send
            + 'static
            + Sync,
        S::Future: Send + 'static,
    {
        debug!(%self, "server configured: setting it up");
        let graceful = CancellationToken::new();
        let server_future =
            self.to_server_future(svc, listener, graceful.clone().cancelled_owned())?;

        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            debug!("starting server main loop");
            let server = drain_rx.watch(server_future, |_| {
                debug!("shutting down server");
                graceful.cancel();
            });

            tokio::select! {
                res = server => {
                    match res {
                        Ok(_) => {
                            debug!("server shutdown");
                        }
                        Err(e) => {
                            tracing::error!(error = %e.chain(), "server error");
                        }
                    }
                }
                _ = token.cancelled() => {
                    debug!("cancellation token triggered: shutting down server");
                }
            }
        });

        Ok(token_clone)
    }
}

/// Addresses a server bound on `addr` can be reached at. A wildcard bind also
/// advertises the first non-loopback local address, when one can be found.
pub fn advertised_addresses(addr: SocketAddr) -> Vec<SocketAddr> {
    let mut out = vec![addr];

    if addr.ip().is_unspecified()
        && let Some(ip) = local_non_loopback_ip()
    {
        out.push(SocketAddr::new(ip, addr.port()));
    }

    out
}

// Connecting a UDP socket selects a route without sending any packet.
fn local_non_loopback_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    let ip = socket.local_addr().ok()?.ip();

    if ip.is_loopback() || ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let server_config = ServerConfig::default();
        assert_eq!(server_config.endpoint, String::new());
        assert_eq!(server_config.max_frame_size, Some(4));
        assert_eq!(server_config.max_concurrent_streams, Some(100));
        assert_eq!(
            server_config.keepalive,
            KeepaliveServerParameters::default()
        );
    }

    #[test]
    fn test_validate() {
        let config = ServerConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingEndpoint)));

        let config = ServerConfig::with_endpoint("0.0.0.0:123456");
        assert!(matches!(config.validate(), Err(ConfigError::EndpointParse(_))));

        let config = ServerConfig::with_endpoint("127.0.0.1:0").with_max_frame_size(Some(0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let config = ServerConfig::with_endpoint("127.0.0.1:0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keepalive_durations_deserialize() {
        let yaml = r#"
endpoint: "0.0.0.0:12345"
keepalive:
  max_connection_age: 1h
  time: 5s
  timeout: 2s
"#;

        let cfg: ServerConfig = serde_yaml::from_str(yaml).expect("deserialization should succeed");
        assert_eq!(cfg.keepalive.max_connection_age, Duration::from_secs(3600));
        assert_eq!(cfg.keepalive.time, Duration::from_secs(5));
        assert_eq!(cfg.keepalive.timeout, Duration::from_secs(2));
        assert_eq!(cfg.max_concurrent_streams, Some(100));
    }

    #[test]
    fn test_advertised_addresses() {
        let loopback: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(advertised_addresses(loopback), vec![loopback]);

        let wildcard: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        let addrs = advertised_addresses(wildcard);
        assert_eq!(addrs[0], wildcard);
        assert!(addrs.iter().skip(1).all(|a| !a.ip().is_loopback() && a.port() == 4000));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ServerConfig::with_endpoint("127.0.0.1:0");
        let listener = config.bind().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
