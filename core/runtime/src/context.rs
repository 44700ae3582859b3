// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use conduit_config::component::Component;
use conduit_config::component::id::{ID, Kind};
use display_error_chain::ErrorChainExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adaptor::{AdaptorHost, Bindings, BoundService};
use crate::config::{ContextConfiguration, Side};
use crate::contract::{CallbackContract, ServiceContract};
use crate::errors::RuntimeError;
use crate::events::ContextEvent;
use crate::host::{CallbackFactory, Host, ServiceFactory, ServiceHost};
use crate::peer::PeerId;
use crate::registry::ComponentRegistry;
use crate::serializer::WireCodec;
use crate::state::ServiceState;
use crate::token::ServiceToken;

const EVENT_CAPACITY: usize = 128;

/// Collects the hosts of a context before it is built.
pub struct ServiceContextBuilder {
    config: ContextConfiguration,
    registry: Arc<ComponentRegistry>,
    hosts: Vec<Arc<dyn Host>>,
    events: broadcast::Sender<ContextEvent>,
}

impl ServiceContextBuilder {
    pub fn with_registry(self, registry: Arc<ComponentRegistry>) -> Self {
        ServiceContextBuilder { registry, ..self }
    }

    /// Server side: exposes `S` through `factory`.
    pub fn register_service<S, C>(
        self,
        factory: impl ServiceFactory<S, C>,
    ) -> Result<Self, RuntimeError>
    where
        S: ServiceContract + ?Sized,
        C: CallbackContract + ?Sized,
    {
        if self.config.side() != Side::Server {
            return Err(RuntimeError::WrongSide("service"));
        }
        let host = ServiceHost::<S, C>::server(factory, self.events.clone());
        self.push(Arc::new(host))
    }

    /// Client side: consumes the remote `S` and receives its callbacks
    /// through the instance `factory` creates.
    pub fn register_callback<S, C>(
        self,
        factory: impl CallbackFactory<S, C>,
    ) -> Result<Self, RuntimeError>
    where
        S: ServiceContract + ?Sized,
        C: CallbackContract + ?Sized,
    {
        if self.config.side() != Side::Client {
            return Err(RuntimeError::WrongSide("callback"));
        }
        let host = ServiceHost::<S, C>::client(factory, self.events.clone());
        self.push(Arc::new(host))
    }

    fn push(mut self, host: Arc<dyn Host>) -> Result<Self, RuntimeError> {
        if self.hosts.iter().any(|h| h.name() == host.name()) {
            return Err(RuntimeError::DuplicateService(host.name().to_string()));
        }
        self.hosts.push(host);
        Ok(self)
    }

    pub fn build(self) -> Result<ServiceContext, RuntimeError> {
        let id = ID::new_with_name(Kind::new("context")?, &self.config.name)?;

        Ok(ServiceContext {
            inner: Arc::new(ContextInner {
                id,
                config: self.config,
                registry: self.registry,
                hosts: self.hosts,
                events: self.events,
                lifecycle: tokio::sync::Mutex::new(()),
                state: RwLock::new(None),
                component_token: Mutex::new(None),
            }),
        })
    }
}

/// Owns the hosts of one side of a connection and drives their lifecycle
/// together with the transport adaptor.
///
/// Open and close are serialized. Open hands out a [`ServiceToken`] that
/// is required to close the context again.
#[derive(Clone)]
pub struct ServiceContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ID,
    config: ContextConfiguration,
    registry: Arc<ComponentRegistry>,
    // registration order, fixed after build
    hosts: Vec<Arc<dyn Host>>,
    events: broadcast::Sender<ContextEvent>,
    lifecycle: tokio::sync::Mutex<()>,
    state: RwLock<Option<OpenState>>,
    component_token: Mutex<Option<ServiceToken>>,
}

struct OpenState {
    token: ServiceToken,
    adaptor: Arc<dyn AdaptorHost>,
    bindings: Arc<Bindings>,
    watcher: JoinHandle<()>,
}

impl ServiceContext {
    pub fn builder(config: ContextConfiguration) -> ServiceContextBuilder {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        ServiceContextBuilder {
            config,
            registry: Arc::new(ComponentRegistry::default()),
            hosts: Vec::new(),
            events,
        }
    }

    pub fn id(&self) -> &ID {
        &self.inner.id
    }

    pub fn config(&self) -> &ContextConfiguration {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.read().is_some()
    }

    pub fn host_state(&self, service: &str) -> Option<ServiceState> {
        self.inner
            .hosts
            .iter()
            .find(|h| h.name() == service)
            .map(|h| h.state())
    }

    /// Codec in use while the context is open.
    pub fn codec(&self) -> Option<WireCodec> {
        self.inner
            .state
            .read()
            .as_ref()
            .map(|s| s.bindings.codec().clone())
    }

    /// Server side: addresses the context can be reached at.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.inner
            .state
            .read()
            .as_ref()
            .map(|s| s.adaptor.endpoints())
            .unwrap_or_default()
    }

    /// Client side: session assigned by the server.
    pub fn session(&self) -> Option<PeerId> {
        self.inner
            .state
            .read()
            .as_ref()
            .and_then(|s| s.adaptor.session())
    }

    /// Server side: currently connected peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner
            .state
            .read()
            .as_ref()
            .map(|s| s.adaptor.peers())
            .unwrap_or_default()
    }

    /// The shared instance of `S`: the local implementation on the server,
    /// the remote proxy on the client.
    pub fn service<S: ServiceContract + ?Sized>(&self) -> Result<Arc<S>, RuntimeError> {
        let state = self.inner.state.read();
        let state = state.as_ref().ok_or(RuntimeError::NotOpen)?;
        state
            .bindings
            .service(S::NAME)
            .and_then(|bound| bound.shared())
            .and_then(|pair| pair.service::<S>())
            .ok_or_else(|| RuntimeError::ServiceNotFound(S::NAME.to_string()))
    }

    /// The callback of the shared instance of `S`: a proxy broadcasting to
    /// subscribed peers on the server, the local implementation on the
    /// client.
    pub fn callback<S, C>(&self) -> Result<Arc<C>, RuntimeError>
    where
        S: ServiceContract + ?Sized,
        C: CallbackContract + ?Sized,
    {
        let state = self.inner.state.read();
        let state = state.as_ref().ok_or(RuntimeError::NotOpen)?;
        state
            .bindings
            .service(S::NAME)
            .and_then(|bound| bound.shared())
            .and_then(|pair| pair.callback::<C>())
            .ok_or_else(|| RuntimeError::ServiceNotFound(S::NAME.to_string()))
    }

    pub async fn open(&self) -> Result<ServiceToken, RuntimeError> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.state.read().is_some() {
            return Err(RuntimeError::AlreadyOpen);
        }

        let token = ServiceToken::mint();
        match self.inner.start(&token).await {
            Ok(state) => {
                *self.inner.state.write() = Some(state);
                info!(context = %self.inner.id, side = ?self.inner.config.side(), "context opened");
                self.inner.emit(ContextEvent::Opened);
                Ok(token)
            }
            Err(e) => {
                error!(context = %self.inner.id, error = %e.chain(), "context failed to open");
                Err(e)
            }
        }
    }

    pub async fn close(&self, token: &ServiceToken) -> Result<(), RuntimeError> {
        let _guard = self.inner.lifecycle.lock().await;

        let state = {
            let mut state = self.inner.state.write();
            let Some(open) = state.as_ref() else {
                return Err(RuntimeError::NotOpen);
            };
            if open.token != *token {
                return Err(RuntimeError::TokenMismatch);
            }
            state.take()
        };
        let Some(state) = state else {
            return Err(RuntimeError::NotOpen);
        };

        state.watcher.abort();
        let mut first_error = state.adaptor.close().await.err();
        if let Some(e) = &first_error {
            warn!(context = %self.inner.id, error = %e.chain(), "adaptor did not close cleanly");
        }
        if let Err(e) = self.inner.release(&state.token, &state.bindings).await {
            first_error.get_or_insert(e);
        }

        info!(context = %self.inner.id, "context closed");
        self.inner.emit(ContextEvent::Closed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes a context opened through [`Component::start`].
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let token = self
            .inner
            .component_token
            .lock()
            .take()
            .ok_or(RuntimeError::NotOpen)?;
        self.close(&token).await
    }
}

impl ContextInner {
    fn emit(&self, event: ContextEvent) {
        let _ = self.events.send(event);
    }

    async fn start(self: &Arc<Self>, token: &ServiceToken) -> Result<OpenState, RuntimeError> {
        let format = self.registry.serializer(&self.config.serializer)?;
        let provider = self.registry.adaptor(&self.config.adaptor)?;
        let codec = WireCodec::new(format, self.registry.exceptions());

        for (i, host) in self.hosts.iter().enumerate() {
            // leftovers of a previous run
            if host.state() != ServiceState::None {
                host.abort();
            }
            if let Err(e) = host.open(token).await {
                host.abort();
                self.unwind_hosts(token, &self.hosts[..i]).await;
                return Err(e);
            }
        }

        let adaptor = match provider.create(&self.config, codec.clone()) {
            Ok(adaptor) => adaptor,
            Err(e) => {
                self.unwind_hosts(token, &self.hosts).await;
                return Err(e);
            }
        };

        let mut services = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            let shared = if host.per_peer() && adaptor.side() == Side::Server {
                None
            } else {
                let invoker = adaptor.invoker(host.name(), None);
                match host.create_instance(token, None, invoker) {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        self.destroy_shared(token, &services);
                        self.unwind_hosts(token, &self.hosts).await;
                        return Err(e);
                    }
                }
            };
            services.push(BoundService::new(host.clone(), shared));
        }

        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let bindings = Arc::new(Bindings::new(
            token.clone(),
            codec,
            services,
            self.events.clone(),
            disconnect_tx,
        ));

        if let Err(e) = adaptor.open(bindings.clone()).await {
            adaptor.abort();
            self.destroy_shared(token, bindings.services());
            self.unwind_hosts(token, &self.hosts).await;
            return Err(e);
        }

        let watcher = tokio::spawn(watch_disconnect(
            Arc::downgrade(self),
            token.clone(),
            disconnect_rx,
        ));

        Ok(OpenState {
            token: token.clone(),
            adaptor,
            bindings,
            watcher,
        })
    }

    /// Undoes a partial open in reverse order. Hosts that reached
    /// [`ServiceState::Open`] run their close hook first, failures are only
    /// logged. Every host ends up back in [`ServiceState::None`].
    async fn unwind_hosts(&self, token: &ServiceToken, hosts: &[Arc<dyn Host>]) {
        for host in hosts.iter().rev() {
            if host.state() == ServiceState::Open
                && let Err(e) = host.close(token).await
            {
                warn!(service = host.name(), error = %e.chain(), "cannot close host while unwinding");
            }
            host.abort();
        }
    }

    fn destroy_shared(&self, token: &ServiceToken, services: &[BoundService]) {
        for bound in services.iter().rev() {
            if let Some(pair) = bound.shared()
                && let Err(e) = bound.host().destroy_instance(token, None, pair.clone())
            {
                warn!(service = bound.name(), error = %e.chain(), "cannot destroy shared instance");
            }
        }
    }

    /// Releases shared instances and closes hosts in reverse order. Every
    /// step runs, the first failure is returned.
    async fn release(&self, token: &ServiceToken, bindings: &Bindings) -> Result<(), RuntimeError> {
        let mut first_error = None;

        for bound in bindings.services().iter().rev() {
            if let Some(pair) = bound.shared()
                && let Err(e) = bound.host().destroy_instance(token, None, pair.clone())
            {
                warn!(service = bound.name(), error = %e.chain(), "cannot destroy shared instance");
                first_error.get_or_insert(e);
            }
            if let Err(e) = bound.host().close(token).await {
                warn!(service = bound.name(), error = %e.chain(), "cannot close host");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn on_disconnect(&self, token: &ServiceToken, reason: i32) {
        let _guard = self.lifecycle.lock().await;

        let state = {
            let mut state = self.state.write();
            if state.as_ref().is_some_and(|open| open.token == *token) {
                state.take()
            } else {
                None
            }
        };
        let Some(state) = state else {
            return;
        };

        warn!(context = %self.id, reason, "lost the server, tearing down");
        state.adaptor.abort();
        self.emit(ContextEvent::Disconnected { reason });

        if let Err(e) = self.release(&state.token, &state.bindings).await {
            debug!(context = %self.id, error = %e.chain(), "teardown after disconnect was not clean");
        }
        info!(context = %self.id, "context closed");
        self.emit(ContextEvent::Closed);
    }
}

async fn watch_disconnect(
    context: Weak<ContextInner>,
    token: ServiceToken,
    mut rx: mpsc::UnboundedReceiver<i32>,
) {
    let Some(reason) = rx.recv().await else {
        return;
    };
    if let Some(context) = context.upgrade() {
        context.on_disconnect(&token, reason).await;
    }
}

#[async_trait]
impl Component for ServiceContext {
    type Error = RuntimeError;

    fn identifier(&self) -> &ID {
        &self.inner.id
    }

    async fn start(&mut self) -> Result<(), Self::Error> {
        let token = self.open().await?;
        *self.inner.component_token.lock() = Some(token);
        Ok(())
    }
}
