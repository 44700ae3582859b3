// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use conduit_config::component::id::IdError;
use conduit_config::grpc::errors::ConfigError;
use thiserror::Error;

use crate::exception::BoxError;
use crate::serializer::SerializerError;
use crate::state::ServiceState;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ServiceState,
    },
    #[error("token does not match the one issued at open")]
    TokenMismatch,
    #[error("context is already open")]
    AlreadyOpen,
    #[error("context is not open")]
    NotOpen,
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid arguments for {method}: {reason}")]
    InvalidArguments { method: String, reason: String },
    #[error("service already registered: {0}")]
    DuplicateService(String),
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("{kind} not registered: {name}")]
    ComponentNotFound { kind: &'static str, name: String },
    #[error("{0} contracts cannot be registered on this side")]
    WrongSide(&'static str),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("unexpected reply code {0}")]
    UnexpectedCode(i32),
    #[error("hook failed")]
    Hook(#[source] BoxError),
    #[error("serialization error")]
    Serialization(#[from] SerializerError),
    #[error("configuration error")]
    Config(#[from] ConfigError),
    #[error("invalid context name")]
    InvalidName(#[from] IdError),
    #[error("grpc error")]
    Grpc(#[from] tonic::Status),
    #[error("timed out while draining peers")]
    DrainTimeout,
}

