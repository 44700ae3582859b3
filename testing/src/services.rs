// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_runtime::async_trait::async_trait;
use conduit_runtime::{BoxError, CallbackFactory, Fault, PeerId, ServiceFactory};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::contracts::{
    AlreadyRegistered, Counter, CounterEvents, Directory, DirectoryEvents, Entry, NotRegistered,
};

pub struct DirectoryService {
    entries: Mutex<BTreeMap<String, Entry>>,
    next_id: Mutex<u64>,
    events: Arc<dyn DirectoryEvents>,
}

impl DirectoryService {
    pub fn new(events: Arc<dyn DirectoryEvents>) -> Self {
        DirectoryService {
            entries: Mutex::new(BTreeMap::new()),
            next_id: Mutex::new(1),
            events,
        }
    }
}

#[async_trait]
impl Directory for DirectoryService {
    async fn register(&self, name: String, tags: Vec<String>) -> Result<Entry, Fault> {
        let entry = {
            let mut entries = self.entries.lock();
            if entries.contains_key(&name) {
                return Err(Fault::raise(AlreadyRegistered { name }));
            }
            let mut next_id = self.next_id.lock();
            let entry = Entry {
                id: *next_id,
                name: name.clone(),
                tags,
            };
            *next_id += 1;
            entries.insert(name, entry.clone());
            entry
        };

        info!(name = %entry.name, id = entry.id, "entry registered");
        self.events.registered(entry.clone());
        Ok(entry)
    }

    async fn unregister(&self, name: String) -> Result<Entry, Fault> {
        let Some(entry) = self.entries.lock().remove(&name) else {
            return Err(Fault::raise(NotRegistered { name }));
        };

        info!(%name, "entry unregistered");
        self.events.unregistered(name);
        Ok(entry)
    }

    async fn lookup(&self, name: String) -> Result<Option<Entry>, Fault> {
        Ok(self.entries.lock().get(&name).cloned())
    }

    async fn list(&self) -> Result<Vec<Entry>, Fault> {
        Ok(self.entries.lock().values().cloned().collect())
    }
}

pub struct CounterService {
    peer: Option<PeerId>,
    value: Mutex<i64>,
    events: Arc<dyn CounterEvents>,
}

#[async_trait]
impl Counter for CounterService {
    async fn add(&self, delta: i64) -> Result<i64, Fault> {
        let value = {
            let mut value = self.value.lock();
            *value = value.saturating_add(delta);
            *value
        };
        debug!(peer = ?self.peer.as_ref().map(PeerId::as_str), delta, value, "counter updated");
        self.events.changed(value);
        Ok(value)
    }

    async fn reset(&self) -> Result<(), Fault> {
        *self.value.lock() = 0;
        self.events.changed(0);
        Ok(())
    }
}

/// Server-side factory of the shared directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryFactory;

#[async_trait]
impl ServiceFactory<dyn Directory, dyn DirectoryEvents> for DirectoryFactory {
    async fn on_open(&self) -> Result<(), BoxError> {
        info!("directory online");
        Ok(())
    }

    fn create_service(
        &self,
        _peer: Option<&PeerId>,
        events: Arc<dyn DirectoryEvents>,
    ) -> Result<Arc<dyn Directory>, BoxError> {
        Ok(Arc::new(DirectoryService::new(events)))
    }
}

/// Server-side factory of the per-peer counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterFactory;

#[async_trait]
impl ServiceFactory<dyn Counter, dyn CounterEvents> for CounterFactory {
    fn create_service(
        &self,
        peer: Option<&PeerId>,
        events: Arc<dyn CounterEvents>,
    ) -> Result<Arc<dyn Counter>, BoxError> {
        info!(peer = ?peer.map(PeerId::as_str), "counter created");
        Ok(Arc::new(CounterService {
            peer: peer.cloned(),
            value: Mutex::new(0),
            events,
        }))
    }

    fn destroy_service(&self, peer: Option<&PeerId>, _service: Arc<dyn Counter>) {
        info!(peer = ?peer.map(PeerId::as_str), "counter released");
    }
}

/// Client-side callbacks that log what the server reports.
#[derive(Debug, Default)]
pub struct EventLog {
    lines: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    fn record(&self, line: String) {
        info!("{line}");
        self.lines.lock().push(line);
    }
}

impl DirectoryEvents for EventLog {
    fn registered(&self, entry: Entry) {
        self.record(format!("registered {} (#{})", entry.name, entry.id));
    }

    fn unregistered(&self, name: String) {
        self.record(format!("unregistered {name}"));
    }
}

impl CounterEvents for EventLog {
    fn changed(&self, value: i64) {
        self.record(format!("counter is now {value}"));
    }
}

/// Client-side factory handing out one shared [`EventLog`] for every
/// contract.
#[derive(Debug, Default, Clone)]
pub struct EventLogFactory {
    log: Arc<EventLog>,
}

impl EventLogFactory {
    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }
}

#[async_trait]
impl CallbackFactory<dyn Directory, dyn DirectoryEvents> for EventLogFactory {
    fn create_callback(
        &self,
        _service: Arc<dyn Directory>,
    ) -> Result<Arc<dyn DirectoryEvents>, BoxError> {
        Ok(self.log.clone())
    }
}

#[async_trait]
impl CallbackFactory<dyn Counter, dyn CounterEvents> for EventLogFactory {
    fn create_callback(&self, _service: Arc<dyn Counter>) -> Result<Arc<dyn CounterEvents>, BoxError> {
        Ok(self.log.clone())
    }
}
