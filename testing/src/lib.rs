// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Sample contracts served by `conduit-server` and consumed by
//! `conduit-client`.

pub mod config;
pub mod contracts;
pub mod services;

use std::future::Future;
use std::sync::Arc;

use conduit_config::component::ComponentBuilder;
use conduit_config::component::id::Kind;
use conduit_runtime::{
    ComponentRegistry, ContextConfiguration, ContextEvent, RuntimeError, ServiceContext, Side,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::contracts::{
    AlreadyRegistered, Counter, CounterEvents, Directory, DirectoryEvents, NotRegistered,
};
use crate::services::{CounterFactory, DirectoryFactory, EventLogFactory};

pub const KIND: &str = "context";

/// Registry with the demo exception types, needed on both sides for
/// remote errors to keep their type.
pub fn registry() -> Arc<ComponentRegistry> {
    let registry = ComponentRegistry::default();
    registry.register_exception::<AlreadyRegistered>();
    registry.register_exception::<NotRegistered>();
    Arc::new(registry)
}

/// Why a demo binary stopped waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    Signal,
    Disconnected(i32),
    EventsClosed,
}

/// Passes context events to `on_event` until `shutdown` completes, the
/// client loses its server or the event stream closes.
pub async fn wait_for_exit(
    events: &mut broadcast::Receiver<ContextEvent>,
    shutdown: impl Future<Output = ()>,
    mut on_event: impl FnMut(&ContextEvent),
) -> Exit {
    let mut shutdown = std::pin::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return Exit::Signal,
            event = events.recv() => match event {
                Ok(ContextEvent::Disconnected { reason }) => return Exit::Disconnected(reason),
                Ok(event) => on_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "context events skipped"),
                Err(RecvError::Closed) => {
                    warn!("context event stream closed");
                    return Exit::EventsClosed;
                }
            },
        }
    }
}

/// Builds a context hosting the sample contracts on a server, or
/// consuming them on a client, depending on the configured transport.
#[derive(Debug, Default, Clone)]
pub struct DemoContextBuilder {
    events: EventLogFactory,
}

impl DemoContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client side: the callbacks delivered so far.
    pub fn events(&self) -> &EventLogFactory {
        &self.events
    }
}

impl ComponentBuilder for DemoContextBuilder {
    type Config = ContextConfiguration;
    type Component = ServiceContext;

    fn kind(&self) -> Kind {
        Kind::new(KIND).expect("KIND is a valid component kind")
    }

    fn build_with_config(
        &self,
        name: &str,
        config: &Self::Config,
    ) -> Result<Self::Component, RuntimeError> {
        let builder = ServiceContext::builder(config.clone().with_name(name)).with_registry(registry());

        let builder = match config.side() {
            Side::Server => builder
                .register_service::<dyn Directory, dyn DirectoryEvents>(DirectoryFactory)?
                .register_service::<dyn Counter, dyn CounterEvents>(CounterFactory)?,
            Side::Client => builder
                .register_callback::<dyn Directory, dyn DirectoryEvents>(self.events.clone())?
                .register_callback::<dyn Counter, dyn CounterEvents>(self.events.clone())?,
        };

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_config::component::Component;
    use conduit_config::grpc::client::{BackoffConfig, ClientConfig};
    use conduit_config::grpc::server::ServerConfig;

    use super::*;

    async fn wait_for_lines(events: &EventLogFactory, count: usize) -> Vec<String> {
        for _ in 0..500 {
            let lines = events.log().lines();
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        events.log().lines()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[tracing_test::traced_test]
    async fn test_demo_session() {
        let server_config =
            ContextConfiguration::server(ServerConfig::with_endpoint("127.0.0.1:0"));
        let mut server = DemoContextBuilder::new()
            .build_with_config("directory", &server_config)
            .unwrap();
        server.start().await.unwrap();
        assert_eq!(server.identifier().to_string(), "context/directory");

        let endpoint = format!("http://{}", server.endpoints()[0]);
        let client_config = ContextConfiguration::client(
            ClientConfig::with_endpoint(&endpoint)
                .with_backoff(BackoffConfig::new_fixed_interval(Duration::from_millis(50), 3)),
        )
        .with_poll_interval(Duration::from_millis(10));
        let client_builder = DemoContextBuilder::new();
        let mut client = client_builder
            .build_with_config("demo-client", &client_config)
            .unwrap();
        client.start().await.unwrap();

        let directory = client.service::<dyn Directory>().unwrap();
        let entry = directory
            .register("printer".to_string(), vec!["floor-2".to_string()])
            .await
            .unwrap();
        assert_eq!(entry.id, 1);

        let fault = directory
            .unregister("scanner".to_string())
            .await
            .unwrap_err();
        assert_eq!(
            fault.downcast_ref::<NotRegistered>(),
            Some(&NotRegistered {
                name: "scanner".to_string()
            })
        );

        let counter = client.service::<dyn Counter>().unwrap();
        assert_eq!(counter.add(4).await.unwrap(), 4);
        counter.reset().await.unwrap();

        let lines = wait_for_lines(client_builder.events(), 3).await;
        assert_eq!(
            lines,
            vec![
                "registered printer (#1)".to_string(),
                "counter is now 4".to_string(),
                "counter is now 0".to_string(),
            ]
        );

        client.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_exit() {
        let (tx, mut rx) = broadcast::channel(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = stop_rx.await;
        };

        tx.send(ContextEvent::Opened).unwrap();
        tx.send(ContextEvent::HostOpened {
            service: "Directory",
        })
        .unwrap();

        let waiter = tokio::spawn(async move {
            let mut seen = Vec::new();
            let exit = wait_for_exit(&mut rx, shutdown, |e| seen.push(e.clone())).await;
            (exit, seen, rx)
        });

        while tx.len() > 0 {
            tokio::task::yield_now().await;
        }
        stop_tx.send(()).unwrap();
        let (exit, seen, mut rx) = waiter.await.unwrap();
        assert_eq!(exit, Exit::Signal);
        assert_eq!(seen.len(), 2);

        tx.send(ContextEvent::Disconnected { reason: 1 }).unwrap();
        let exit = wait_for_exit(&mut rx, std::future::pending(), |_| {}).await;
        assert_eq!(exit, Exit::Disconnected(1));

        // a closed stream ends the wait instead of spinning
        drop(tx);
        let exit = wait_for_exit(&mut rx, std::future::pending(), |_| {}).await;
        assert_eq!(exit, Exit::EventsClosed);
    }

    #[test]
    fn test_kind() {
        assert_eq!(DemoContextBuilder::new().kind().to_string(), KIND);
    }
}
