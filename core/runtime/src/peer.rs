// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Server-side bookkeeping of connected peers.
//!
//! Lock order: registry map, then a peer's queues, then its heartbeat.
//! No lock is held across an await point.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::host::InstancePair;
use crate::proxy::MethodCall;

/// Session identifier handed to a client at open.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn generate() -> Self {
        PeerId(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        PeerId(Arc::from(value))
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        PeerId(Arc::from(value))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

pub struct PeerDescriptor {
    id: PeerId,
    subscriptions: Vec<String>,
    instances: HashMap<String, InstancePair>,
    queues: Mutex<HashMap<String, Vec<MethodCall>>>,
    last_heartbeat: Mutex<Instant>,
    connected_at: Instant,
    client_time_ms: i64,
    cancel: CancellationToken,
}

impl PeerDescriptor {
    pub fn new(id: PeerId, subscriptions: Vec<String>, client_time_ms: i64) -> Self {
        let now = Instant::now();
        let queues = subscriptions
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();

        PeerDescriptor {
            id,
            subscriptions,
            instances: HashMap::new(),
            queues: Mutex::new(queues),
            last_heartbeat: Mutex::new(now),
            connected_at: now,
            client_time_ms,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn client_time_ms(&self) -> i64 {
        self.client_time_ms
    }

    /// Instances owned by this peer, consumed when the peer goes away.
    pub fn into_instances(self) -> HashMap<String, InstancePair> {
        self.instances
    }
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, PeerDescriptor>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, descriptor: PeerDescriptor) {
        self.peers.write().insert(descriptor.id.clone(), descriptor);
    }

    /// Removes the peer and cancels its poll stream.
    pub fn remove(&self, id: &PeerId) -> Option<PeerDescriptor> {
        let descriptor = self.peers.write().remove(id)?;
        descriptor.cancel.cancel();
        Some(descriptor)
    }

    pub fn drain_all(&self) -> Vec<PeerDescriptor> {
        let peers = mem::take(&mut *self.peers.write());
        peers
            .into_values()
            .inspect(|descriptor| descriptor.cancel.cancel())
            .collect()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn attach_instance(&self, id: &PeerId, contract: &str, pair: InstancePair) -> bool {
        match self.peers.write().get_mut(id) {
            Some(descriptor) => {
                descriptor.instances.insert(contract.to_string(), pair);
                true
            }
            None => false,
        }
    }

    pub fn instance(&self, id: &PeerId, contract: &str) -> Option<InstancePair> {
        self.peers
            .read()
            .get(id)
            .and_then(|descriptor| descriptor.instances.get(contract).cloned())
    }

    /// Token cancelled when the peer is removed.
    pub fn cancellation(&self, id: &PeerId) -> Option<CancellationToken> {
        self.peers
            .read()
            .get(id)
            .map(|descriptor| descriptor.cancel.clone())
    }

    /// Records a heartbeat. Returns false for unknown peers.
    pub fn touch(&self, id: &PeerId) -> bool {
        match self.peers.read().get(id) {
            Some(descriptor) => {
                *descriptor.last_heartbeat.lock() = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Peers whose last heartbeat is older than `timeout`.
    pub fn expired(&self, timeout: Duration) -> Vec<PeerId> {
        let now = Instant::now();
        self.peers
            .read()
            .values()
            .filter(|descriptor| now.duration_since(*descriptor.last_heartbeat.lock()) > timeout)
            .map(|descriptor| descriptor.id.clone())
            .collect()
    }

    /// Queues a callback for one peer. Dropped if the peer is gone or did
    /// not subscribe to the contract.
    pub fn enqueue(&self, id: &PeerId, contract: &str, call: MethodCall) -> bool {
        let peers = self.peers.read();
        let Some(descriptor) = peers.get(id) else {
            return false;
        };
        let mut queues = descriptor.queues.lock();
        match queues.get_mut(contract) {
            Some(queue) => {
                queue.push(call);
                true
            }
            None => false,
        }
    }

    /// Queues a callback for every peer subscribed to the contract.
    /// Returns the number of peers reached.
    pub fn broadcast(&self, contract: &str, call: &MethodCall) -> usize {
        let peers = self.peers.read();
        let mut reached = 0;
        for descriptor in peers.values() {
            if let Some(queue) = descriptor.queues.lock().get_mut(contract) {
                queue.push(call.clone());
                reached += 1;
            }
        }
        reached
    }

    /// Takes every pending callback of a peer, contract by contract in
    /// subscription order, FIFO within a contract.
    pub fn drain(&self, id: &PeerId) -> Option<Vec<MethodCall>> {
        let peers = self.peers.read();
        let descriptor = peers.get(id)?;
        let mut queues = descriptor.queues.lock();
        let mut items = Vec::new();
        for name in &descriptor.subscriptions {
            if let Some(queue) = queues.get_mut(name) {
                items.append(queue);
            }
        }
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(method: &str, arg: &str) -> MethodCall {
        MethodCall {
            service: "Directory".to_string(),
            method: method.to_string(),
            args: vec![arg.to_string()],
        }
    }

    #[test]
    fn test_enqueue_and_drain_in_order() {
        let registry = PeerRegistry::new();
        let id = PeerId::generate();
        registry.insert(PeerDescriptor::new(
            id.clone(),
            vec!["Directory".to_string()],
            0,
        ));

        assert!(registry.enqueue(&id, "Directory", call("m", "1")));
        assert!(registry.enqueue(&id, "Directory", call("m", "2")));
        assert!(!registry.enqueue(&id, "Counter", call("m", "3")));

        let items = registry.drain(&id).unwrap();
        assert_eq!(items, vec![call("m", "1"), call("m", "2")]);
        assert!(registry.drain(&id).unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_reaches_subscribers_only() {
        let registry = PeerRegistry::new();
        let a = PeerId::generate();
        let b = PeerId::generate();
        registry.insert(PeerDescriptor::new(a.clone(), vec!["Directory".to_string()], 0));
        registry.insert(PeerDescriptor::new(b.clone(), vec!["Counter".to_string()], 0));

        assert_eq!(registry.broadcast("Directory", &call("m", "x")), 1);
        assert_eq!(registry.drain(&a).unwrap().len(), 1);
        assert!(registry.drain(&b).unwrap().is_empty());
    }

    #[test]
    fn test_remove_cancels() {
        let registry = PeerRegistry::new();
        let id = PeerId::from("peer-1");
        registry.insert(PeerDescriptor::new(id.clone(), vec![], 42));

        let cancel = registry.cancellation(&id).unwrap();
        assert!(!cancel.is_cancelled());

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.client_time_ms(), 42);
        assert!(cancel.is_cancelled());
        assert!(!registry.contains(&id));
        assert!(registry.drain(&id).is_none());
        assert!(!registry.touch(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired() {
        let registry = PeerRegistry::new();
        let stale = PeerId::from("stale");
        let fresh = PeerId::from("fresh");
        registry.insert(PeerDescriptor::new(stale.clone(), vec![], 0));
        registry.insert(PeerDescriptor::new(fresh.clone(), vec![], 0));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(registry.touch(&fresh));
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(registry.expired(Duration::from_secs(30)), vec![stale]);
        assert_eq!(registry.drain_all().len(), 2);
        assert!(registry.is_empty());
    }
}
