// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adaptor::{AdaptorProvider, GrpcAdaptorProvider};
use crate::errors::RuntimeError;
use crate::exception::{ExceptionRegistry, RemoteException};
use crate::serializer::{JsonSerializer, Serializer, YamlSerializer};

/// Named serializers, adaptor providers and exception types a context
/// resolves at open.
pub struct ComponentRegistry {
    serializers: RwLock<HashMap<String, Arc<dyn Serializer>>>,
    adaptors: RwLock<HashMap<String, Arc<dyn AdaptorProvider>>>,
    exceptions: RwLock<ExceptionRegistry>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        let registry = ComponentRegistry::empty();
        registry.register_serializer(Arc::new(JsonSerializer));
        registry.register_serializer(Arc::new(YamlSerializer));
        registry.register_adaptor(Arc::new(GrpcAdaptorProvider));
        registry
    }
}

impl ComponentRegistry {
    /// Registry with the built-in components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with nothing but the generic exception.
    pub fn empty() -> Self {
        ComponentRegistry {
            serializers: RwLock::new(HashMap::new()),
            adaptors: RwLock::new(HashMap::new()),
            exceptions: RwLock::new(ExceptionRegistry::default()),
        }
    }

    pub fn register_serializer(&self, serializer: Arc<dyn Serializer>) {
        self.serializers
            .write()
            .insert(serializer.name().to_string(), serializer);
    }

    pub fn register_adaptor(&self, provider: Arc<dyn AdaptorProvider>) {
        self.adaptors
            .write()
            .insert(provider.name().to_string(), provider);
    }

    pub fn register_exception<E: RemoteException>(&self) {
        self.exceptions.write().register::<E>();
    }

    pub fn serializer(&self, name: &str) -> Result<Arc<dyn Serializer>, RuntimeError> {
        self.serializers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::ComponentNotFound {
                kind: "serializer",
                name: name.to_string(),
            })
    }

    pub fn adaptor(&self, name: &str) -> Result<Arc<dyn AdaptorProvider>, RuntimeError> {
        self.adaptors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::ComponentNotFound {
                kind: "adaptor",
                name: name.to_string(),
            })
    }

    /// Snapshot of the exception types registered so far.
    pub fn exceptions(&self) -> Arc<ExceptionRegistry> {
        Arc::new(self.exceptions.read().clone())
    }

    pub fn serializer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.serializers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn adaptor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adaptors.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    use super::*;

    #[derive(Error, Debug, Serialize, Deserialize)]
    #[error("quota exceeded")]
    struct QuotaExceeded;

    impl RemoteException for QuotaExceeded {
        const CODE: &'static str = "quota_exceeded";
    }

    #[test]
    fn test_builtins() {
        let registry = ComponentRegistry::new();

        assert_eq!(registry.serializer_names(), vec!["json", "yaml"]);
        assert_eq!(registry.adaptor_names(), vec!["grpc"]);
        assert_eq!(registry.serializer("yaml").unwrap().name(), "yaml");
        assert!(registry.adaptor("grpc").is_ok());
    }

    #[test]
    fn test_missing_component() {
        let registry = ComponentRegistry::empty();

        match registry.serializer("json") {
            Err(RuntimeError::ComponentNotFound { kind, name }) => {
                assert_eq!(kind, "serializer");
                assert_eq!(name, "json");
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.name().to_string())),
        }
        assert!(registry.adaptor("grpc").is_err());
    }

    #[test]
    fn test_exception_snapshot() {
        let registry = ComponentRegistry::new();
        let before = registry.exceptions();

        registry.register_exception::<QuotaExceeded>();

        assert!(before.get("quota_exceeded").is_none());
        assert!(registry.exceptions().get("quota_exceeded").is_some());
    }
}
