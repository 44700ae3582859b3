// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use conduit_config::grpc::client::{BackoffConfig, ClientConfig};
use conduit_config::grpc::server::ServerConfig;
use conduit_runtime::async_trait::async_trait;
use conduit_runtime::{
    BoxError, ComponentRegistry, ContextConfiguration, ContextEvent, FactoryFn, Fault,
    HeartbeatConfig, PeerId, RemoteException, ServiceContext, ServiceFactory, ServiceToken,
    callback_contract, service_contract,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

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

/// Never registered, travels as a generic exception.
#[derive(Error, Debug)]
#[error("counter overflow")]
pub struct CounterOverflow;

service_contract! {
    pub trait Directory {
        async fn register(&self, name: String, tags: Vec<String>) -> Entry;
        async fn lookup(&self, name: String) -> Option<Entry>;
        async fn count(&self) -> usize;
        async fn clear(&self);
    }
}

callback_contract! {
    pub trait DirectoryEvents {
        fn registered(&self, name: String);
        fn cleared(&self, removed: usize);
    }
}

service_contract! {
    #[per_peer]
    pub trait Counter {
        async fn add(&self, delta: u64) -> u64;
        async fn get(&self) -> u64;
    }
}

callback_contract! {
    pub trait CounterEvents {
        fn changed(&self, value: u64);
    }
}

pub struct DirectoryService {
    entries: Mutex<BTreeMap<String, Entry>>,
    next_id: AtomicU64,
    events: Arc<dyn DirectoryEvents>,
}

impl DirectoryService {
    pub fn new(events: Arc<dyn DirectoryEvents>) -> Self {
        DirectoryService {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
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
            let entry = Entry {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                name: name.clone(),
                tags,
            };
            entries.insert(name.clone(), entry.clone());
            entry
        };
        self.events.registered(name);
        Ok(entry)
    }

    async fn lookup(&self, name: String) -> Result<Option<Entry>, Fault> {
        Ok(self.entries.lock().get(&name).cloned())
    }

    async fn count(&self) -> Result<usize, Fault> {
        Ok(self.entries.lock().len())
    }

    async fn clear(&self) -> Result<(), Fault> {
        let removed = {
            let mut entries = self.entries.lock();
            let removed = entries.len();
            entries.clear();
            removed
        };
        self.events.cleared(removed);
        Ok(())
    }
}

pub struct CounterService {
    value: Mutex<u64>,
    events: Arc<dyn CounterEvents>,
}

#[async_trait]
impl Counter for CounterService {
    async fn add(&self, delta: u64) -> Result<u64, Fault> {
        let value = {
            let mut value = self.value.lock();
            *value = value
                .checked_add(delta)
                .ok_or_else(|| Fault::raise(CounterOverflow))?;
            *value
        };
        self.events.changed(value);
        Ok(value)
    }

    async fn get(&self) -> Result<u64, Fault> {
        Ok(*self.value.lock())
    }
}

/// Counts the per-peer counters alive on the server.
#[derive(Default)]
pub struct CounterFactory {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
}

#[async_trait]
impl ServiceFactory<dyn Counter, dyn CounterEvents> for Arc<CounterFactory> {
    fn create_service(
        &self,
        _peer: Option<&PeerId>,
        events: Arc<dyn CounterEvents>,
    ) -> Result<Arc<dyn Counter>, BoxError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CounterService {
            value: Mutex::new(0),
            events,
        }))
    }

    fn destroy_service(&self, _peer: Option<&PeerId>, _service: Arc<dyn Counter>) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records the callbacks delivered to a client.
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl DirectoryEvents for Recorder {
    fn registered(&self, name: String) {
        self.calls.lock().push(format!("registered:{name}"));
    }

    fn cleared(&self, removed: usize) {
        self.calls.lock().push(format!("cleared:{removed}"));
    }
}

impl CounterEvents for Recorder {
    fn changed(&self, value: u64) {
        self.calls.lock().push(format!("changed:{value}"));
    }
}

pub fn registry() -> Arc<ComponentRegistry> {
    let registry = ComponentRegistry::default();
    registry.register_exception::<AlreadyRegistered>();
    Arc::new(registry)
}

pub fn server_config(heartbeat: HeartbeatConfig) -> ContextConfiguration {
    ContextConfiguration::server(ServerConfig::with_endpoint("127.0.0.1:0"))
        .with_name("server")
        .with_heartbeat(heartbeat)
        .with_drain_timeout(Duration::from_secs(2))
}

pub struct TestServer {
    pub context: ServiceContext,
    pub token: ServiceToken,
    pub counters: Arc<CounterFactory>,
}

impl TestServer {
    pub async fn start(heartbeat: HeartbeatConfig) -> Self {
        let counters = Arc::new(CounterFactory::default());
        let context = ServiceContext::builder(server_config(heartbeat))
            .with_registry(registry())
            .register_service::<dyn Directory, dyn DirectoryEvents>(FactoryFn(
                |_peer: Option<&PeerId>, events: Arc<dyn DirectoryEvents>| -> Arc<dyn Directory> {
                    Arc::new(DirectoryService::new(events))
                },
            ))
            .unwrap()
            .register_service::<dyn Counter, dyn CounterEvents>(counters.clone())
            .unwrap()
            .build()
            .unwrap();
        let token = context.open().await.unwrap();

        TestServer {
            context,
            token,
            counters,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.context.endpoints()[0])
    }

    pub async fn stop(self) {
        self.context.close(&self.token).await.unwrap();
    }
}

pub fn client_config(endpoint: &str, ping_interval: Duration) -> ContextConfiguration {
    let transport = ClientConfig::with_endpoint(endpoint)
        .with_backoff(BackoffConfig::new_fixed_interval(Duration::from_millis(50), 3));
    ContextConfiguration::client(transport)
        .with_name("client")
        .with_heartbeat(HeartbeatConfig {
            ping_interval,
            ..Default::default()
        })
        .with_poll_interval(Duration::from_millis(10))
}

pub struct TestClient {
    pub context: ServiceContext,
    pub token: ServiceToken,
    pub recorder: Arc<Recorder>,
}

impl TestClient {
    pub async fn connect(endpoint: &str) -> Self {
        Self::connect_with(client_config(endpoint, Duration::from_millis(100))).await
    }

    pub async fn connect_with(config: ContextConfiguration) -> Self {
        let recorder = Arc::new(Recorder::default());
        let directory_events = recorder.clone();
        let counter_events = recorder.clone();

        let context = ServiceContext::builder(config)
            .with_registry(registry())
            .register_callback::<dyn Directory, dyn DirectoryEvents>(FactoryFn(
                move |_service: Arc<dyn Directory>| -> Arc<dyn DirectoryEvents> {
                    directory_events.clone()
                },
            ))
            .unwrap()
            .register_callback::<dyn Counter, dyn CounterEvents>(FactoryFn(
                move |_service: Arc<dyn Counter>| -> Arc<dyn CounterEvents> {
                    counter_events.clone()
                },
            ))
            .unwrap()
            .build()
            .unwrap();
        let token = context.open().await.unwrap();

        TestClient {
            context,
            token,
            recorder,
        }
    }

    pub fn directory(&self) -> Arc<dyn Directory> {
        self.context.service::<dyn Directory>().unwrap()
    }

    pub fn counter(&self) -> Arc<dyn Counter> {
        self.context.service::<dyn Counter>().unwrap()
    }

    pub async fn stop(self) {
        self.context.close(&self.token).await.unwrap();
    }
}

/// Polls `condition` until it holds or five seconds have passed.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Next event accepted by `matches`, skipping the others.
pub async fn next_event(
    events: &mut broadcast::Receiver<ContextEvent>,
    mut matches: impl FnMut(&ContextEvent) -> bool,
) -> Option<ContextEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
