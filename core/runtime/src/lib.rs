// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Contract-based RPC between a server context and client contexts.
//!
//! Services are declared with [`service_contract!`] and their callbacks
//! with [`callback_contract!`]. A [`ServiceContext`] hosts the
//! implementations on the server, or the callback implementations and
//! service proxies on the client, and drives the transport adaptor.

pub mod adaptor;
pub mod api;
pub mod config;
pub mod context;
pub mod contract;
pub mod descriptor;
pub mod errors;
pub mod events;
pub mod exception;
pub mod host;
pub mod peer;
pub mod proxy;
pub mod registry;
pub mod serializer;
pub mod state;
pub mod token;

pub use async_trait;
pub use futures::future::BoxFuture;

pub use adaptor::{AdaptorHost, AdaptorProvider, Bindings, BoundService, GrpcAdaptorProvider};
pub use config::{ContextConfiguration, HeartbeatConfig, PollConfig, Side, TransportConfig};
pub use context::{ServiceContext, ServiceContextBuilder};
pub use contract::{CallbackContract, Contract, NoCallbacks, ServiceContract};
pub use descriptor::{MethodDescriptor, MethodDescriptorCollection};
pub use errors::RuntimeError;
pub use events::{ContextEvent, PeerExit};
pub use exception::{
    BoxError, Exception, ExceptionDescriptor, ExceptionRecord, ExceptionRegistry, Fault,
    GenericException, RemoteException,
};
pub use host::{CallbackFactory, FactoryFn, Host, InstancePair, ServiceFactory, ServiceHost};
pub use peer::{PeerDescriptor, PeerId, PeerRegistry};
pub use proxy::{ArgReader, ArgWriter, InstanceProxy, Invoker, MethodCall};
pub use registry::ComponentRegistry;
pub use serializer::{JsonSerializer, Serializer, SerializerError, WireCodec, YamlSerializer};
pub use state::ServiceState;
pub use token::ServiceToken;
