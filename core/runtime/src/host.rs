// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use display_error_chain::DisplayErrorChain;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::contract::{CallbackContract, ServiceContract};
use crate::descriptor::{MethodDescriptor, MethodDescriptorCollection};
use crate::errors::RuntimeError;
use crate::events::ContextEvent;
use crate::exception::{BoxError, Fault};
use crate::peer::PeerId;
use crate::proxy::Invoker;
use crate::serializer::WireCodec;
use crate::state::ServiceState;
use crate::token::ServiceToken;

/// Creates server-side implementations of a service contract.
#[async_trait]
pub trait ServiceFactory<S: ?Sized, C: ?Sized>: Send + Sync + 'static {
    async fn on_open(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// `peer` is set for per-peer contracts and `None` for the shared
    /// instance. `callback` reaches that peer, or every subscribed peer
    /// for the shared instance.
    fn create_service(&self, peer: Option<&PeerId>, callback: Arc<C>) -> Result<Arc<S>, BoxError>;

    fn destroy_service(&self, _peer: Option<&PeerId>, _service: Arc<S>) {}
}

/// Creates client-side implementations of a callback contract.
#[async_trait]
pub trait CallbackFactory<S: ?Sized, C: ?Sized>: Send + Sync + 'static {
    async fn on_open(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// `service` is the proxy to the remote service the callback belongs
    /// to.
    fn create_callback(&self, service: Arc<S>) -> Result<Arc<C>, BoxError>;

    fn destroy_callback(&self, _callback: Arc<C>) {}
}

/// Adapts a plain closure into a factory.
pub struct FactoryFn<F>(pub F);

#[async_trait]
impl<S, C, F> ServiceFactory<S, C> for FactoryFn<F>
where
    S: ?Sized + 'static,
    C: ?Sized + 'static,
    F: Fn(Option<&PeerId>, Arc<C>) -> Arc<S> + Send + Sync + 'static,
{
    fn create_service(&self, peer: Option<&PeerId>, callback: Arc<C>) -> Result<Arc<S>, BoxError> {
        Ok((self.0)(peer, callback))
    }
}

#[async_trait]
impl<S, C, F> CallbackFactory<S, C> for FactoryFn<F>
where
    S: ?Sized + 'static,
    C: ?Sized + 'static,
    F: Fn(Arc<S>) -> Arc<C> + Send + Sync + 'static,
{
    fn create_callback(&self, service: Arc<S>) -> Result<Arc<C>, BoxError> {
        Ok((self.0)(service))
    }
}

trait ServiceInstance: Send + Sync {
    fn invoke<'a>(
        &'a self,
        descriptor: &'a MethodDescriptor,
        args: &'a [String],
        codec: &'a WireCodec,
    ) -> BoxFuture<'a, Result<String, Fault>>;
}

trait CallbackInstance: Send + Sync {
    fn deliver(
        &self,
        descriptor: &MethodDescriptor,
        args: &[String],
        codec: &WireCodec,
    ) -> Result<(), RuntimeError>;
}

struct ServiceSlot<S: ?Sized>(Arc<S>);

impl<S: ServiceContract + ?Sized> ServiceInstance for ServiceSlot<S> {
    fn invoke<'a>(
        &'a self,
        descriptor: &'a MethodDescriptor,
        args: &'a [String],
        codec: &'a WireCodec,
    ) -> BoxFuture<'a, Result<String, Fault>> {
        S::dispatch(&self.0, descriptor, args, codec)
    }
}

struct CallbackSlot<C: ?Sized>(Arc<C>);

impl<C: CallbackContract + ?Sized> CallbackInstance for CallbackSlot<C> {
    fn deliver(
        &self,
        descriptor: &MethodDescriptor,
        args: &[String],
        codec: &WireCodec,
    ) -> Result<(), RuntimeError> {
        C::dispatch(&self.0, descriptor, args, codec)
    }
}

/// A service implementation bound to its callback. On the server the
/// service is local and the callback a proxy, on the client the reverse.
#[derive(Clone)]
pub struct InstancePair {
    service: Arc<dyn ServiceInstance>,
    callback: Arc<dyn CallbackInstance>,
    typed_service: Arc<dyn Any + Send + Sync>,
    typed_callback: Arc<dyn Any + Send + Sync>,
}

impl InstancePair {
    fn new<S, C>(service: Arc<S>, callback: Arc<C>) -> Self
    where
        S: ServiceContract + ?Sized,
        C: CallbackContract + ?Sized,
    {
        InstancePair {
            service: Arc::new(ServiceSlot(service.clone())),
            callback: Arc::new(CallbackSlot(callback.clone())),
            typed_service: Arc::new(service),
            typed_callback: Arc::new(callback),
        }
    }

    pub fn service<S: ServiceContract + ?Sized>(&self) -> Option<Arc<S>> {
        self.typed_service.downcast_ref::<Arc<S>>().cloned()
    }

    pub fn callback<C: CallbackContract + ?Sized>(&self) -> Option<Arc<C>> {
        self.typed_callback.downcast_ref::<Arc<C>>().cloned()
    }

    pub fn invoke<'a>(
        &'a self,
        descriptor: &'a MethodDescriptor,
        args: &'a [String],
        codec: &'a WireCodec,
    ) -> BoxFuture<'a, Result<String, Fault>> {
        self.service.invoke(descriptor, args, codec)
    }

    pub fn deliver(
        &self,
        descriptor: &MethodDescriptor,
        args: &[String],
        codec: &WireCodec,
    ) -> Result<(), RuntimeError> {
        self.callback.deliver(descriptor, args, codec)
    }
}

/// Type-erased view of a [`ServiceHost`] used by the context and the
/// adaptors.
#[async_trait]
pub trait Host: Send + Sync {
    fn name(&self) -> &'static str;

    fn callback_name(&self) -> &'static str;

    fn per_peer(&self) -> bool;

    fn state(&self) -> ServiceState;

    fn service_descriptors(&self) -> &'static MethodDescriptorCollection;

    fn callback_descriptors(&self) -> &'static MethodDescriptorCollection;

    async fn open(&self, token: &ServiceToken) -> Result<(), RuntimeError>;

    async fn close(&self, token: &ServiceToken) -> Result<(), RuntimeError>;

    /// Unconditional reset to [`ServiceState::None`].
    fn abort(&self);

    fn create_instance(
        &self,
        token: &ServiceToken,
        peer: Option<&PeerId>,
        invoker: Arc<dyn Invoker>,
    ) -> Result<InstancePair, RuntimeError>;

    fn destroy_instance(
        &self,
        token: &ServiceToken,
        peer: Option<&PeerId>,
        pair: InstancePair,
    ) -> Result<(), RuntimeError>;
}

enum Factory<S: ?Sized, C: ?Sized> {
    Service(Box<dyn ServiceFactory<S, C>>),
    Callback(Box<dyn CallbackFactory<S, C>>),
}

#[derive(Default)]
struct HostInner {
    state: ServiceState,
    token: Option<ServiceToken>,
}

/// Lifecycle owner for one contract pair.
pub struct ServiceHost<S: ?Sized, C: ?Sized> {
    factory: Factory<S, C>,
    inner: Mutex<HostInner>,
    events: broadcast::Sender<ContextEvent>,
    _contract: PhantomData<fn(&S, &C)>,
}

impl<S, C> ServiceHost<S, C>
where
    S: ServiceContract + ?Sized,
    C: CallbackContract + ?Sized,
{
    pub fn server(
        factory: impl ServiceFactory<S, C>,
        events: broadcast::Sender<ContextEvent>,
    ) -> Self {
        Self::with_factory(Factory::Service(Box::new(factory)), events)
    }

    pub fn client(
        factory: impl CallbackFactory<S, C>,
        events: broadcast::Sender<ContextEvent>,
    ) -> Self {
        Self::with_factory(Factory::Callback(Box::new(factory)), events)
    }

    fn with_factory(factory: Factory<S, C>, events: broadcast::Sender<ContextEvent>) -> Self {
        ServiceHost {
            factory,
            inner: Mutex::new(HostInner::default()),
            events,
            _contract: PhantomData,
        }
    }

    // Moves `from` to `to` only if the current state is `from`.
    fn transition(
        &self,
        operation: &'static str,
        from: ServiceState,
        to: ServiceState,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.state != from {
            return Err(RuntimeError::InvalidState {
                operation,
                state: inner.state,
            });
        }
        inner.state = to;
        Ok(())
    }

    fn check_open(&self, operation: &'static str, token: &ServiceToken) -> Result<(), RuntimeError> {
        let inner = self.inner.lock();
        if inner.state != ServiceState::Open {
            return Err(RuntimeError::InvalidState {
                operation,
                state: inner.state,
            });
        }
        match &inner.token {
            Some(t) if t == token => Ok(()),
            _ => Err(RuntimeError::TokenMismatch),
        }
    }

    fn set_state(&self, state: ServiceState, token: Option<ServiceToken>) {
        let mut inner = self.inner.lock();
        inner.state = state;
        inner.token = token;
    }

    fn emit(&self, event: ContextEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl<S, C> Host for ServiceHost<S, C>
where
    S: ServiceContract + ?Sized,
    C: CallbackContract + ?Sized,
{
    fn name(&self) -> &'static str {
        S::NAME
    }

    fn callback_name(&self) -> &'static str {
        C::NAME
    }

    fn per_peer(&self) -> bool {
        S::PER_PEER
    }

    fn state(&self) -> ServiceState {
        self.inner.lock().state
    }

    fn service_descriptors(&self) -> &'static MethodDescriptorCollection {
        S::descriptors()
    }

    fn callback_descriptors(&self) -> &'static MethodDescriptorCollection {
        C::descriptors()
    }

    async fn open(&self, token: &ServiceToken) -> Result<(), RuntimeError> {
        self.transition("open", ServiceState::None, ServiceState::Opening)?;

        let res = match &self.factory {
            Factory::Service(factory) => factory.on_open().await,
            Factory::Callback(factory) => factory.on_open().await,
        };

        match res {
            Ok(()) => {
                self.set_state(ServiceState::Open, Some(token.clone()));
                info!(service = S::NAME, "host opened");
                self.emit(ContextEvent::HostOpened { service: S::NAME });
                Ok(())
            }
            Err(e) => {
                self.set_state(ServiceState::Faulted, None);
                error!(service = S::NAME, error = %DisplayErrorChain::new(e.as_ref()), "host failed to open");
                Err(RuntimeError::Hook(e))
            }
        }
    }

    async fn close(&self, token: &ServiceToken) -> Result<(), RuntimeError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != ServiceState::Open {
                return Err(RuntimeError::InvalidState {
                    operation: "close",
                    state: inner.state,
                });
            }
            if inner.token.as_ref() != Some(token) {
                return Err(RuntimeError::TokenMismatch);
            }
            inner.state = ServiceState::Closing;
        }

        let res = match &self.factory {
            Factory::Service(factory) => factory.on_close().await,
            Factory::Callback(factory) => factory.on_close().await,
        };

        match res {
            Ok(()) => {
                self.set_state(ServiceState::Closed, None);
                info!(service = S::NAME, "host closed");
                self.emit(ContextEvent::HostClosed { service: S::NAME });
                Ok(())
            }
            Err(e) => {
                self.set_state(ServiceState::Faulted, None);
                error!(service = S::NAME, error = %DisplayErrorChain::new(e.as_ref()), "host failed to close");
                Err(RuntimeError::Hook(e))
            }
        }
    }

    fn abort(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            inner.token = None;
            std::mem::take(&mut inner.state)
        };
        debug!(service = S::NAME, %previous, "host aborted");
    }

    fn create_instance(
        &self,
        token: &ServiceToken,
        peer: Option<&PeerId>,
        invoker: Arc<dyn Invoker>,
    ) -> Result<InstancePair, RuntimeError> {
        self.check_open("create instance", token)?;

        match &self.factory {
            Factory::Service(factory) => {
                let callback = C::proxy(invoker);
                let service = factory
                    .create_service(peer, callback.clone())
                    .map_err(RuntimeError::Hook)?;
                debug!(service = S::NAME, ?peer, "service instance created");
                Ok(InstancePair::new(service, callback))
            }
            Factory::Callback(factory) => {
                let service = S::proxy(invoker);
                let callback = factory
                    .create_callback(service.clone())
                    .map_err(RuntimeError::Hook)?;
                debug!(service = S::NAME, "callback instance created");
                Ok(InstancePair::new(service, callback))
            }
        }
    }

    fn destroy_instance(
        &self,
        token: &ServiceToken,
        peer: Option<&PeerId>,
        pair: InstancePair,
    ) -> Result<(), RuntimeError> {
        self.check_open("destroy instance", token)?;

        match &self.factory {
            Factory::Service(factory) => {
                if let Some(service) = pair.service::<S>() {
                    factory.destroy_service(peer, service);
                }
            }
            Factory::Callback(factory) => {
                if let Some(callback) = pair.callback::<C>() {
                    factory.destroy_callback(callback);
                }
            }
        }
        debug!(service = S::NAME, ?peer, "instance destroyed");
        Ok(())
    }
}
