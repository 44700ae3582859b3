// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::errors::RuntimeError;
use crate::serializer::SerializerError;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An error type that can travel between peers.
///
/// The `CODE` identifies the type on the wire; both sides must register
/// the same type under the same code for the exception to keep its
/// concrete type after a round trip.
pub trait RemoteException: StdError + Serialize + DeserializeOwned + Send + Sync + 'static {
    const CODE: &'static str;
}

/// Fallback for errors with no registered code.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct GenericException {
    #[serde(default)]
    pub message: String,
}

impl GenericException {
    pub fn new(message: impl Into<String>) -> Self {
        GenericException {
            message: message.into(),
        }
    }
}

impl RemoteException for GenericException {
    const CODE: &'static str = "generic";
}

/// A user-level error raised by a service operation.
#[derive(Debug)]
pub struct Exception {
    error: BoxError,
}

impl Exception {
    pub fn new<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Exception {
            error: Box::new(error),
        }
    }

    pub fn from_boxed(error: BoxError) -> Self {
        Exception { error }
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    pub fn downcast<E: StdError + 'static>(self) -> Result<E, Self> {
        match self.error.downcast::<E>() {
            Ok(error) => Ok(*error),
            Err(error) => Err(Exception { error }),
        }
    }

    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.error.as_ref()
    }

    pub fn into_inner(self) -> BoxError {
        self.error
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl StdError for Exception {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

/// Failure of a contract operation: either an exception raised by the
/// implementation, or a runtime error on the way to or from it.
#[derive(Error, Debug)]
pub enum Fault {
    #[error("remote exception: {0}")]
    Exception(Exception),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Fault {
    pub fn raise<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Fault::Exception(Exception::new(error))
    }

    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Fault::Exception(exception) => Some(exception),
            Fault::Runtime(_) => None,
        }
    }

    pub fn runtime(&self) -> Option<&RuntimeError> {
        match self {
            Fault::Exception(_) => None,
            Fault::Runtime(err) => Some(err),
        }
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.exception().and_then(|e| e.downcast_ref::<E>())
    }
}

impl From<Exception> for Fault {
    fn from(exception: Exception) -> Self {
        Fault::Exception(exception)
    }
}

impl From<SerializerError> for Fault {
    fn from(err: SerializerError) -> Self {
        Fault::Runtime(RuntimeError::Serialization(err))
    }
}

/// Wire form of an exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub code: String,
    #[serde(default)]
    pub data: Value,
}

type EncodeFn = fn(&(dyn StdError + Send + Sync + 'static)) -> Option<Result<Value, serde_json::Error>>;
type DecodeFn = fn(Value) -> Result<BoxError, serde_json::Error>;

#[derive(Debug, Clone)]
pub struct ExceptionDescriptor {
    code: &'static str,
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl ExceptionDescriptor {
    pub fn of<E: RemoteException>() -> Self {
        ExceptionDescriptor {
            code: E::CODE,
            type_name: type_name::<E>(),
            encode: |error| error.downcast_ref::<E>().map(serde_json::to_value),
            decode: |data| serde_json::from_value::<E>(data).map(|e| Box::new(e) as BoxError),
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Exception types known to this process, keyed by wire code.
#[derive(Debug, Clone)]
pub struct ExceptionRegistry {
    descriptors: Vec<ExceptionDescriptor>,
}

impl Default for ExceptionRegistry {
    fn default() -> Self {
        let mut registry = ExceptionRegistry {
            descriptors: Vec::new(),
        };
        registry.register::<GenericException>();
        registry
    }
}

impl ExceptionRegistry {
    /// Registers `E`, replacing any type previously registered under the
    /// same code.
    pub fn register<E: RemoteException>(&mut self) {
        let descriptor = ExceptionDescriptor::of::<E>();
        match self.descriptors.iter_mut().find(|d| d.code == E::CODE) {
            Some(existing) => *existing = descriptor,
            None => self.descriptors.push(descriptor),
        }
    }

    pub fn get(&self, code: &str) -> Option<&ExceptionDescriptor> {
        self.descriptors.iter().find(|d| d.code == code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.code)
    }

    pub fn marshal(&self, exception: &Exception) -> ExceptionRecord {
        for descriptor in &self.descriptors {
            match (descriptor.encode)(exception.as_error()) {
                Some(Ok(data)) => {
                    return ExceptionRecord {
                        code: descriptor.code.to_string(),
                        data,
                    };
                }
                Some(Err(e)) => {
                    warn!(code = descriptor.code, error = %e, "cannot encode exception, sending generic");
                    break;
                }
                None => {}
            }
        }

        ExceptionRecord {
            code: GenericException::CODE.to_string(),
            data: serde_json::json!({ "message": exception.to_string() }),
        }
    }

    pub fn unmarshal(&self, record: ExceptionRecord) -> Exception {
        let message = || {
            record
                .data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("remote exception {}", record.code))
        };

        match self.get(&record.code) {
            Some(descriptor) => match (descriptor.decode)(record.data.clone()) {
                Ok(error) => Exception::from_boxed(error),
                Err(e) => {
                    warn!(code = %record.code, error = %e, "cannot decode exception, using generic");
                    Exception::new(GenericException::new(message()))
                }
            },
            None => Exception::new(GenericException::new(message())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug, PartialEq, Serialize, Deserialize)]
    #[error("not enough funds: need {needed}, have {available}")]
    struct InsufficientFunds {
        needed: u64,
        available: u64,
    }

    impl RemoteException for InsufficientFunds {
        const CODE: &'static str = "bank.insufficient_funds";
    }

    #[derive(Error, Debug)]
    #[error("local only")]
    struct LocalOnly;

    #[test]
    fn test_registered_exception_keeps_type() {
        let mut registry = ExceptionRegistry::default();
        registry.register::<InsufficientFunds>();

        let exception = Exception::new(InsufficientFunds {
            needed: 10,
            available: 3,
        });
        let record = registry.marshal(&exception);
        assert_eq!(record.code, "bank.insufficient_funds");

        let back = registry.unmarshal(record);
        assert_eq!(
            back.downcast_ref::<InsufficientFunds>(),
            Some(&InsufficientFunds {
                needed: 10,
                available: 3
            })
        );
    }

    #[test]
    fn test_unregistered_exception_becomes_generic() {
        let registry = ExceptionRegistry::default();

        let record = registry.marshal(&Exception::new(LocalOnly));
        assert_eq!(record.code, GenericException::CODE);

        let back = registry.unmarshal(record);
        let generic = back.downcast_ref::<GenericException>().unwrap();
        assert_eq!(generic.message, "local only");
    }

    #[test]
    fn test_unknown_code_becomes_generic() {
        let registry = ExceptionRegistry::default();
        let record = ExceptionRecord {
            code: "nobody.knows".to_string(),
            data: serde_json::json!({ "needed": 1 }),
        };

        let back = registry.unmarshal(record);
        assert!(back.is::<GenericException>());
        assert_eq!(back.to_string(), "remote exception nobody.knows");
    }

    #[test]
    fn test_register_replaces_same_code() {
        let mut registry = ExceptionRegistry::default();
        registry.register::<InsufficientFunds>();
        registry.register::<InsufficientFunds>();

        assert_eq!(registry.codes().count(), 2);
        assert_eq!(
            registry.get("bank.insufficient_funds").map(|d| d.type_name()),
            Some(type_name::<InsufficientFunds>())
        );
    }

    #[test]
    fn test_fault_helpers() {
        let fault = Fault::raise(InsufficientFunds {
            needed: 2,
            available: 1,
        });
        assert!(fault.downcast_ref::<InsufficientFunds>().is_some());
        assert!(fault.runtime().is_none());

        let fault = Fault::from(RuntimeError::NotOpen);
        assert!(fault.exception().is_none());
        assert!(matches!(fault.runtime(), Some(RuntimeError::NotOpen)));
    }
}
