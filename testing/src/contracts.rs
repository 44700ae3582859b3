// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Contracts shared by the demo server and client.

use conduit_runtime::{RemoteException, callback_contract, service_contract};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name} is already registered")]
pub struct AlreadyRegistered {
    pub name: String,
}

impl RemoteException for AlreadyRegistered {
    const CODE: &'static str = "directory.already_registered";
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name} is not registered")]
pub struct NotRegistered {
    pub name: String,
}

impl RemoteException for NotRegistered {
    const CODE: &'static str = "directory.not_registered";
}

service_contract! {
    /// Name registry shared by every connected peer.
    pub trait Directory {
        async fn register(&self, name: String, tags: Vec<String>) -> Entry;
        async fn unregister(&self, name: String) -> Entry;
        async fn lookup(&self, name: String) -> Option<Entry>;
        async fn list(&self) -> Vec<Entry>;
    }
}

callback_contract! {
    pub trait DirectoryEvents {
        fn registered(&self, entry: Entry);
        fn unregistered(&self, name: String);
    }
}

service_contract! {
    #[per_peer]
    /// A counter private to each peer.
    pub trait Counter {
        async fn add(&self, delta: i64) -> i64;
        async fn reset(&self);
    }
}

callback_contract! {
    pub trait CounterEvents {
        fn changed(&self, value: i64);
    }
}
