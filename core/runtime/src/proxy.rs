// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::marker::PhantomData;
use std::slice;
use std::sync::Arc;

use async_trait::async_trait;
use display_error_chain::ErrorChainExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::contract::Contract;
use crate::descriptor::MethodDescriptor;
use crate::errors::RuntimeError;
use crate::exception::Fault;
use crate::serializer::{SerializerError, WireCodec};

/// A serialized call addressed to a contract operation. Also the unit
/// queued for delivery of callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub service: String,
    pub method: String,
    pub args: Vec<String>,
}

/// Transport seen from a proxy.
#[async_trait]
pub trait Invoker: Send + Sync {
    fn codec(&self) -> &WireCodec;

    /// One-way delivery, no completion is reported back.
    fn post(&self, call: MethodCall) -> Result<(), RuntimeError>;

    /// Request/response delivery, returns the serialized result.
    async fn call(&self, call: MethodCall) -> Result<String, Fault>;
}

/// Local stand-in for a remote contract instance. The contract macros
/// implement each contract trait for `InstanceProxy<dyn Trait>`.
pub struct InstanceProxy<C: ?Sized> {
    invoker: Arc<dyn Invoker>,
    _contract: PhantomData<fn(&C)>,
}

impl<C: Contract + ?Sized> InstanceProxy<C> {
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        InstanceProxy {
            invoker,
            _contract: PhantomData,
        }
    }

    pub fn writer(&self) -> ArgWriter<'_> {
        ArgWriter::new(self.invoker.codec())
    }

    fn prepare(&self, method: &str, writer: ArgWriter<'_>) -> Result<MethodCall, RuntimeError> {
        let descriptor = C::descriptors()
            .by_name(method)
            .ok_or_else(|| RuntimeError::MethodNotFound(format!("{}.{}", C::NAME, method)))?;

        Ok(MethodCall {
            service: C::NAME.to_string(),
            method: descriptor.generated_name().to_string(),
            args: writer.finish()?,
        })
    }

    /// Fire-and-forget. Failures are logged and dropped.
    pub fn invoke_void(&self, method: &str, writer: ArgWriter<'_>) {
        if let Err(e) = self
            .prepare(method, writer)
            .and_then(|call| self.invoker.post(call))
        {
            warn!(contract = C::NAME, method, error = %e.chain(), "dropping one-way call");
        }
    }

    pub async fn invoke_async_void(&self, method: &str, writer: ArgWriter<'_>) -> Result<(), Fault> {
        let call = self.prepare(method, writer)?;
        self.invoker.call(call).await.map(|_| ())
    }

    pub async fn invoke_async<T: DeserializeOwned>(
        &self,
        method: &str,
        writer: ArgWriter<'_>,
    ) -> Result<T, Fault> {
        let call = self.prepare(method, writer)?;
        let payload = self.invoker.call(call).await?;
        Ok(self.invoker.codec().decode(&payload)?)
    }
}

/// Serializes call arguments in declaration order. The first failure is
/// kept and reported by [`ArgWriter::finish`].
pub struct ArgWriter<'a> {
    codec: &'a WireCodec,
    args: Vec<String>,
    error: Option<SerializerError>,
}

impl<'a> ArgWriter<'a> {
    pub fn new(codec: &'a WireCodec) -> Self {
        ArgWriter {
            codec,
            args: Vec::new(),
            error: None,
        }
    }

    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) {
        if self.error.is_some() {
            return;
        }
        match self.codec.encode(value) {
            Ok(arg) => self.args.push(arg),
            Err(e) => self.error = Some(e),
        }
    }

    pub fn finish(self) -> Result<Vec<String>, SerializerError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.args),
        }
    }
}

/// Deserializes incoming arguments against a method descriptor.
pub struct ArgReader<'a> {
    descriptor: &'a MethodDescriptor,
    codec: &'a WireCodec,
    args: slice::Iter<'a, String>,
    position: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(
        descriptor: &'a MethodDescriptor,
        args: &'a [String],
        codec: &'a WireCodec,
    ) -> Result<Self, RuntimeError> {
        let expected = descriptor.parameter_types().len();
        if args.len() != expected {
            return Err(RuntimeError::InvalidArguments {
                method: descriptor.generated_name().to_string(),
                reason: format!("expected {} arguments, got {}", expected, args.len()),
            });
        }

        Ok(ArgReader {
            descriptor,
            codec,
            args: args.iter(),
            position: 0,
        })
    }

    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, RuntimeError> {
        let position = self.position;
        let raw = self.args.next().ok_or_else(|| RuntimeError::InvalidArguments {
            method: self.descriptor.generated_name().to_string(),
            reason: format!("missing argument {position}"),
        })?;
        self.position += 1;

        self.codec
            .decode(raw)
            .map_err(|e| RuntimeError::InvalidArguments {
                method: self.descriptor.generated_name().to_string(),
                reason: format!(
                    "argument {} ({}): {}",
                    position,
                    self.descriptor.parameter_types()[position],
                    e
                ),
            })
    }
}
