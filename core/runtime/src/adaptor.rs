// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Transport plumbing between a context and its remote peers.

pub mod client;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::config::{ContextConfiguration, Side, TransportConfig};
use crate::errors::RuntimeError;
use crate::events::ContextEvent;
use crate::host::{Host, InstancePair};
use crate::peer::PeerId;
use crate::proxy::Invoker;
use crate::serializer::WireCodec;
use crate::token::ServiceToken;

pub use client::GrpcClientAdaptor;
pub use server::GrpcServerAdaptor;

/// A host together with its shared instance, if it has one.
pub struct BoundService {
    host: Arc<dyn Host>,
    shared: Option<InstancePair>,
}

impl BoundService {
    pub(crate) fn new(host: Arc<dyn Host>, shared: Option<InstancePair>) -> Self {
        BoundService { host, shared }
    }

    pub fn name(&self) -> &'static str {
        self.host.name()
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn shared(&self) -> Option<&InstancePair> {
        self.shared.as_ref()
    }
}

/// Everything an adaptor needs from an open context.
pub struct Bindings {
    token: ServiceToken,
    codec: WireCodec,
    services: Vec<BoundService>,
    events: broadcast::Sender<ContextEvent>,
    disconnect: mpsc::UnboundedSender<i32>,
}

impl Bindings {
    pub(crate) fn new(
        token: ServiceToken,
        codec: WireCodec,
        services: Vec<BoundService>,
        events: broadcast::Sender<ContextEvent>,
        disconnect: mpsc::UnboundedSender<i32>,
    ) -> Self {
        Bindings {
            token,
            codec,
            services,
            events,
            disconnect,
        }
    }

    pub fn token(&self) -> &ServiceToken {
        &self.token
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub fn services(&self) -> &[BoundService] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&BoundService> {
        self.services.iter().find(|s| s.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn emit(&self, event: ContextEvent) {
        let _ = self.events.send(event);
    }

    /// Client side: reports that the server is gone. The context tears
    /// itself down in response.
    pub fn notify_disconnect(&self, reason: i32) {
        let _ = self.disconnect.send(reason);
    }
}

/// Transport endpoint owned by an open context.
#[async_trait]
pub trait AdaptorHost: Send + Sync {
    fn side(&self) -> Side;

    /// Invoker for the proxies bound to the service named `contract`. On
    /// the server it queues that service's callbacks for `peer`, or for
    /// every subscriber when `peer` is `None`. On the client it sends
    /// requests to the server.
    fn invoker(&self, contract: &'static str, peer: Option<&PeerId>) -> Arc<dyn Invoker>;

    async fn open(&self, bindings: Arc<Bindings>) -> Result<(), RuntimeError>;

    async fn close(&self) -> Result<(), RuntimeError>;

    /// Drops all transport state without talking to the remote side.
    fn abort(&self);

    /// Addresses the server can be reached at.
    fn endpoints(&self) -> Vec<SocketAddr> {
        Vec::new()
    }

    /// Session handed out by the server to this client.
    fn session(&self) -> Option<PeerId> {
        None
    }

    /// Peers currently connected to this server.
    fn peers(&self) -> Vec<PeerId> {
        Vec::new()
    }
}

pub trait AdaptorProvider: Send + Sync {
    fn name(&self) -> &str;

    fn create(
        &self,
        config: &ContextConfiguration,
        codec: WireCodec,
    ) -> Result<Arc<dyn AdaptorHost>, RuntimeError>;
}

/// Adaptor provider for the gRPC transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrpcAdaptorProvider;

impl AdaptorProvider for GrpcAdaptorProvider {
    fn name(&self) -> &str {
        "grpc"
    }

    fn create(
        &self,
        config: &ContextConfiguration,
        codec: WireCodec,
    ) -> Result<Arc<dyn AdaptorHost>, RuntimeError> {
        let adaptor: Arc<dyn AdaptorHost> = match &config.transport {
            TransportConfig::Server(server) => Arc::new(GrpcServerAdaptor::new(
                server.clone(),
                config.heartbeat.clone(),
                config.drain_timeout,
                codec,
            )),
            TransportConfig::Client(client) => Arc::new(GrpcClientAdaptor::new(
                client.clone(),
                config.heartbeat.ping_interval,
                config.poll.interval,
                codec,
            )),
        };
        Ok(adaptor)
    }
}
