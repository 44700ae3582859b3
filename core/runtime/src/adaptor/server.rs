// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use conduit_config::grpc::errors::ConfigError;
use conduit_config::grpc::server::{ServerConfig, advertised_addresses};
use display_error_chain::ErrorChainExt;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use super::{AdaptorHost, Bindings};
use crate::api::{
    CloseReply, CloseRequest, InvokeCode, InvokeReply, InvokeRequest, OpenReply, OpenRequest,
    PingReply, PingRequest, PollCode, PollItem, PollReply, PollRequest, RuntimeService,
    RuntimeServiceServer, now_ms,
};
use crate::config::{HeartbeatConfig, Side};
use crate::errors::RuntimeError;
use crate::events::{ContextEvent, PeerExit};
use crate::exception::{Exception, Fault, GenericException};
use crate::peer::{PeerDescriptor, PeerId, PeerRegistry};
use crate::proxy::{Invoker, MethodCall};
use crate::serializer::WireCodec;

/// Server side of the gRPC transport.
pub struct GrpcServerAdaptor {
    config: ServerConfig,
    heartbeat: HeartbeatConfig,
    drain_timeout: Duration,
    codec: WireCodec,
    peers: Arc<PeerRegistry>,
    running: Mutex<Option<Running>>,
}

struct Running {
    shared: Arc<ServerShared>,
    server_cancel: CancellationToken,
    sweep_cancel: CancellationToken,
    signal: drain::Signal,
    endpoints: Vec<SocketAddr>,
}

impl GrpcServerAdaptor {
    pub fn new(
        config: ServerConfig,
        heartbeat: HeartbeatConfig,
        drain_timeout: Duration,
        codec: WireCodec,
    ) -> Self {
        GrpcServerAdaptor {
            config,
            heartbeat,
            drain_timeout,
            codec,
            peers: Arc::new(PeerRegistry::new()),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AdaptorHost for GrpcServerAdaptor {
    fn side(&self) -> Side {
        Side::Server
    }

    fn invoker(&self, contract: &'static str, peer: Option<&PeerId>) -> Arc<dyn Invoker> {
        Arc::new(CallbackEmitter {
            contract,
            peer: peer.cloned(),
            peers: self.peers.clone(),
            codec: self.codec.clone(),
        })
    }

    async fn open(&self, bindings: Arc<Bindings>) -> Result<(), RuntimeError> {
        if self.running.lock().is_some() {
            return Err(RuntimeError::AlreadyOpen);
        }

        let listener = self.config.bind().await?;
        let local = listener.local_addr().map_err(ConfigError::from)?;

        let (signal, watch) = drain::channel();
        let shared = Arc::new(ServerShared {
            bindings,
            peers: self.peers.clone(),
            watch: RwLock::new(Some(watch.clone())),
        });

        let svc = RuntimeServiceServer::from_arc(Arc::new(GrpcService {
            shared: shared.clone(),
        }));
        let server_cancel = self.config.run_server(&[svc], listener, watch)?;
        let sweep_cancel = spawn_sweeper(shared.clone(), self.heartbeat.clone());

        let endpoints = advertised_addresses(local);
        info!(%local, ?endpoints, "server adaptor listening");

        *self.running.lock() = Some(Running {
            shared,
            server_cancel,
            sweep_cancel,
            signal,
            endpoints,
        });

        Ok(())
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };

        running.sweep_cancel.cancel();

        // no new poll streams from here on
        running.shared.watch.write().take();

        // completes once every poll stream has handed over its final reply
        // and the server has closed its connections
        let drained = tokio::time::timeout(self.drain_timeout, running.signal.drain()).await;

        running.server_cancel.cancel();
        running.shared.disconnect_all(PeerExit::Shutdown);

        match drained {
            Ok(()) => {
                info!("server adaptor closed");
                Ok(())
            }
            Err(_) => {
                warn!(timeout = ?self.drain_timeout, "poll streams did not drain in time");
                Err(RuntimeError::DrainTimeout)
            }
        }
    }

    fn abort(&self) {
        if let Some(running) = self.running.lock().take() {
            running.sweep_cancel.cancel();
            running.server_cancel.cancel();
            running.shared.watch.write().take();
            running.shared.disconnect_all(PeerExit::Shutdown);
        }
    }

    fn endpoints(&self) -> Vec<SocketAddr> {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.endpoints.clone())
            .unwrap_or_default()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.ids()
    }
}

/// State shared by the RPC handlers and background tasks of one open
/// server.
struct ServerShared {
    bindings: Arc<Bindings>,
    peers: Arc<PeerRegistry>,
    watch: RwLock<Option<drain::Watch>>,
}

impl ServerShared {
    fn drain_watch(&self) -> Option<drain::Watch> {
        self.watch.read().clone()
    }

    fn connect(&self, services: Vec<String>, client_time_ms: i64) -> Result<PeerId, Status> {
        for name in &services {
            if self.bindings.service(name).is_none() {
                return Err(Status::not_found(format!("service not found: {name}")));
            }
        }

        let id = PeerId::generate();
        self.peers
            .insert(PeerDescriptor::new(id.clone(), services.clone(), client_time_ms));

        let token = self.bindings.token();
        for name in &services {
            let Some(bound) = self.bindings.service(name) else {
                continue;
            };
            if !bound.host().per_peer() {
                continue;
            }

            let invoker = Arc::new(CallbackEmitter {
                contract: bound.name(),
                peer: Some(id.clone()),
                peers: self.peers.clone(),
                codec: self.bindings.codec().clone(),
            });
            match bound.host().create_instance(token, Some(&id), invoker) {
                Ok(pair) => {
                    self.peers.attach_instance(&id, name, pair);
                }
                Err(e) => {
                    error!(peer = %id, service = %name, error = %e.chain(), "cannot create per-peer instance");
                    // never announced, so no disconnection event either
                    if let Some(descriptor) = self.peers.remove(&id) {
                        self.destroy_instances(descriptor);
                    }
                    return Err(Status::failed_precondition(format!(
                        "cannot create {name} instance: {e}"
                    )));
                }
            }
        }

        info!(peer = %id, ?services, "peer connected");
        self.bindings.emit(ContextEvent::PeerConnected { peer: id.clone() });
        Ok(id)
    }

    /// Removes a peer and releases its per-peer instances.
    fn disconnect(&self, id: &PeerId, reason: PeerExit) -> bool {
        let Some(descriptor) = self.peers.remove(id) else {
            return false;
        };
        self.release(descriptor, reason);
        true
    }

    fn disconnect_all(&self, reason: PeerExit) {
        for descriptor in self.peers.drain_all() {
            self.release(descriptor, reason);
        }
    }

    fn release(&self, descriptor: PeerDescriptor, reason: PeerExit) {
        let id = self.destroy_instances(descriptor);

        info!(peer = %id, %reason, "peer disconnected");
        self.bindings
            .emit(ContextEvent::PeerDisconnected { peer: id, reason });
    }

    fn destroy_instances(&self, descriptor: PeerDescriptor) -> PeerId {
        let id = descriptor.id().clone();
        let token = self.bindings.token();
        for (name, pair) in descriptor.into_instances() {
            let Some(bound) = self.bindings.service(&name) else {
                continue;
            };
            if let Err(e) = bound.host().destroy_instance(token, Some(&id), pair) {
                warn!(peer = %id, service = %name, error = %e.chain(), "cannot destroy per-peer instance");
            }
        }
        id
    }

    async fn invoke(&self, request: InvokeRequest) -> InvokeReply {
        let peer = PeerId::from(request.token);
        if !self.peers.contains(&peer) {
            return InvokeReply::with_code(InvokeCode::UnknownPeer, peer.to_string());
        }

        let Some(bound) = self.bindings.service(&request.service) else {
            return InvokeReply::with_code(InvokeCode::ServiceNotFound, request.service);
        };
        let Some(descriptor) = bound.host().service_descriptors().get(&request.method) else {
            return InvokeReply::with_code(InvokeCode::MethodNotFound, request.method);
        };

        let pair = if bound.host().per_peer() {
            self.peers.instance(&peer, bound.name())
        } else {
            bound.shared().cloned()
        };
        let Some(pair) = pair else {
            // per-peer contract the peer did not subscribe to
            return InvokeReply::with_code(InvokeCode::ServiceNotFound, request.service);
        };

        let codec = self.bindings.codec();
        let outcome = AssertUnwindSafe(pair.invoke(descriptor, &request.args, codec))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(method = %request.method, "operation panicked");
                Err(Fault::raise(GenericException::new("operation panicked")))
            });

        match outcome {
            Ok(payload) => InvokeReply::with_code(InvokeCode::Ok, payload),
            Err(Fault::Exception(exception)) => self.exception_reply(&exception),
            Err(Fault::Runtime(RuntimeError::InvalidArguments { method, reason })) => {
                debug!(%method, %reason, "invalid arguments");
                InvokeReply::with_code(InvokeCode::InvalidArguments, reason)
            }
            Err(Fault::Runtime(RuntimeError::MethodNotFound(method))) => {
                InvokeReply::with_code(InvokeCode::MethodNotFound, method)
            }
            Err(Fault::Runtime(e)) => {
                warn!(method = %request.method, error = %e.chain(), "operation failed");
                let exception = Exception::new(GenericException::new(e.chain().to_string()));
                self.exception_reply(&exception)
            }
        }
    }

    fn exception_reply(&self, exception: &Exception) -> InvokeReply {
        match self.bindings.codec().encode_exception(exception) {
            Ok(payload) => InvokeReply::with_code(InvokeCode::Exception, payload),
            Err(e) => {
                error!(error = %e.chain(), "cannot encode exception");
                InvokeReply::with_code(InvokeCode::Exception, String::new())
            }
        }
    }
}

fn spawn_sweeper(shared: Arc<ServerShared>, heartbeat: HeartbeatConfig) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat.sweep_interval);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for id in shared.peers.expired(heartbeat.peer_timeout) {
                        warn!(peer = %id, timeout = ?heartbeat.peer_timeout, "evicting silent peer");
                        shared.disconnect(&id, PeerExit::Evicted);
                    }
                }
                _ = token.cancelled() => {
                    debug!("stopping heartbeat sweep");
                    break;
                }
            }
        }
    });

    cancel
}

/// Invoker behind server-side callback proxies. Calls are queued on the
/// peer registry and picked up by the peers' poll streams. `contract` is
/// the service the callback belongs to.
struct CallbackEmitter {
    contract: &'static str,
    peer: Option<PeerId>,
    peers: Arc<PeerRegistry>,
    codec: WireCodec,
}

#[async_trait]
impl Invoker for CallbackEmitter {
    fn codec(&self) -> &WireCodec {
        &self.codec
    }

    fn post(&self, call: MethodCall) -> Result<(), RuntimeError> {
        // queued and delivered under the owning service's name
        let call = MethodCall {
            service: self.contract.to_string(),
            ..call
        };
        match &self.peer {
            Some(peer) => {
                if !self.peers.enqueue(peer, self.contract, call) {
                    debug!(%peer, contract = self.contract, "peer gone, callback dropped");
                }
            }
            None => {
                let reached = self.peers.broadcast(self.contract, &call);
                debug!(contract = self.contract, reached, "callback broadcast");
            }
        }
        Ok(())
    }

    async fn call(&self, call: MethodCall) -> Result<String, Fault> {
        Err(RuntimeError::Unsupported(format!(
            "callbacks are one-way, cannot call {}",
            call.method
        ))
        .into())
    }
}

struct GrpcService {
    shared: Arc<ServerShared>,
}

/// Replies of one poll stream. The drain watch is held until the stream
/// has been consumed, so a server shutdown waits for the final reply to
/// reach the transport.
struct PollReplies {
    replies: ReceiverStream<Result<PollReply, Status>>,
    _watch: drain::Watch,
}

impl Stream for PollReplies {
    type Item = Result<PollReply, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.replies.poll_next_unpin(cx)
    }
}

fn match_for_io_error(err_status: &Status) -> Option<&std::io::Error> {
    let mut err: &(dyn std::error::Error + 'static) = err_status;

    loop {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Some(io_err);
        }

        // h2::Error do not expose std::io::Error with `source()`
        // https://github.com/hyperium/h2/pull/462
        if let Some(h2_err) = err.downcast_ref::<h2::Error>()
            && let Some(io_err) = h2_err.get_io()
        {
            return Some(io_err);
        }

        err = err.source()?;
    }
}

#[tonic::async_trait]
impl RuntimeService for GrpcService {
    type PollStream = Pin<Box<dyn Stream<Item = Result<PollReply, Status>> + Send + 'static>>;

    async fn open(&self, request: Request<OpenRequest>) -> Result<Response<OpenReply>, Status> {
        let request = request.into_inner();
        let id = self
            .shared
            .connect(request.services, request.client_time_ms)?;

        Ok(Response::new(OpenReply {
            token: id.to_string(),
            server_time_ms: now_ms(),
        }))
    }

    async fn close(&self, request: Request<CloseRequest>) -> Result<Response<CloseReply>, Status> {
        let id = PeerId::from(request.into_inner().token);
        if !self.shared.disconnect(&id, PeerExit::Closed) {
            return Err(Status::not_found(format!("unknown peer: {id}")));
        }
        Ok(Response::new(CloseReply {}))
    }

    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        let id = PeerId::from(request.into_inner().token);
        if !self.shared.peers.touch(&id) {
            return Err(Status::not_found(format!("unknown peer: {id}")));
        }
        Ok(Response::new(PingReply {
            server_time_ms: now_ms(),
        }))
    }

    async fn invoke(
        &self,
        request: Request<InvokeRequest>,
    ) -> Result<Response<InvokeReply>, Status> {
        let reply = self.shared.invoke(request.into_inner()).await;
        Ok(Response::new(reply))
    }

    async fn poll(
        &self,
        request: Request<Streaming<PollRequest>>,
    ) -> Result<Response<Self::PollStream>, Status> {
        let watch = self
            .shared
            .drain_watch()
            .ok_or_else(|| Status::unavailable("server is shutting down"))?;

        let mut stream = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let shared = self.shared.clone();
        let signaled = watch.clone().signaled();

        tokio::spawn(async move {
            let mut watch = std::pin::pin!(signaled);

            // the first request identifies the peer
            let first = tokio::select! {
                next = stream.next() => next,
                _ = &mut watch => {
                    let _ = tx.send(Ok(PollReply::with_code(PollCode::Shutdown))).await;
                    return;
                }
            };
            let id = match first {
                Some(Ok(request)) => PeerId::from(request.token),
                Some(Err(e)) => {
                    debug!(error = %e.chain(), "poll stream failed before first request");
                    return;
                }
                None => return,
            };
            let Some(cancel) = shared.peers.cancellation(&id) else {
                debug!(peer = %id, "poll from unknown peer");
                let _ = tx.send(Ok(PollReply::with_code(PollCode::Evicted))).await;
                return;
            };

            debug!(peer = %id, "poll stream started");
            loop {
                let items = shared
                    .peers
                    .drain(&id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(PollItem::from)
                    .collect();
                let reply = PollReply {
                    code: PollCode::Ok as i32,
                    items,
                };
                if tx.send(Ok(reply)).await.is_err() {
                    debug!(peer = %id, "poll receiver dropped");
                    break;
                }

                tokio::select! {
                    next = stream.next() => {
                        match next {
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                if let Some(io_err) = match_for_io_error(&e) {
                                    if io_err.kind() == std::io::ErrorKind::BrokenPipe {
                                        info!(peer = %id, "poll stream closed by peer");
                                    }
                                } else {
                                    debug!(peer = %id, error = %e.chain(), "poll stream error");
                                }
                                break;
                            }
                            None => {
                                debug!(peer = %id, "end of poll stream");
                                break;
                            }
                        }
                    }
                    _ = &mut watch => {
                        debug!(peer = %id, "shutting down poll stream on drain");
                        let _ = tx.send(Ok(PollReply::with_code(PollCode::Shutdown))).await;
                        break;
                    }
                    _ = cancel.cancelled() => {
                        debug!(peer = %id, "peer removed, ending poll stream");
                        let _ = tx.send(Ok(PollReply::with_code(PollCode::Evicted))).await;
                        break;
                    }
                }
            }
        });

        let out_stream = PollReplies {
            replies: ReceiverStream::new(rx),
            _watch: watch,
        };
        Ok(Response::new(Box::pin(out_stream) as Self::PollStream))
    }
}
