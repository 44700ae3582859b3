// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_config::grpc::client::ClientConfig;
use display_error_chain::ErrorChainExt;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Code, Streaming};
use tracing::{debug, error, info, warn};

use super::{AdaptorHost, Bindings};
use crate::api::{
    CloseRequest, InvokeCode, InvokeRequest, OpenRequest, PingRequest, PollCode, PollItem,
    PollReply, PollRequest, REASON_PING_FAILED, REASON_STREAM_LOST, RuntimeServiceClient, now_ms,
};
use crate::config::Side;
use crate::errors::RuntimeError;
use crate::exception::Fault;
use crate::peer::PeerId;
use crate::proxy::{Invoker, MethodCall};
use crate::serializer::WireCodec;

#[derive(Clone)]
struct Session {
    client: RuntimeServiceClient<Channel>,
    token: PeerId,
}

type SessionSlot = Arc<RwLock<Option<Session>>>;

struct Tasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Client side of the gRPC transport.
pub struct GrpcClientAdaptor {
    config: ClientConfig,
    ping_interval: Duration,
    poll_interval: Duration,
    codec: WireCodec,
    session: SessionSlot,
    tasks: Mutex<Option<Tasks>>,
}

impl GrpcClientAdaptor {
    pub fn new(
        config: ClientConfig,
        ping_interval: Duration,
        poll_interval: Duration,
        codec: WireCodec,
    ) -> Self {
        GrpcClientAdaptor {
            config,
            ping_interval,
            poll_interval,
            codec,
            session: Arc::new(RwLock::new(None)),
            tasks: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AdaptorHost for GrpcClientAdaptor {
    fn side(&self) -> Side {
        Side::Client
    }

    fn invoker(&self, _contract: &'static str, _peer: Option<&PeerId>) -> Arc<dyn Invoker> {
        Arc::new(RemoteInvoker {
            session: self.session.clone(),
            codec: self.codec.clone(),
        })
    }

    async fn open(&self, bindings: Arc<Bindings>) -> Result<(), RuntimeError> {
        if self.tasks.lock().is_some() {
            return Err(RuntimeError::AlreadyOpen);
        }

        let channel = self.config.to_channel().await?;
        let mut client = RuntimeServiceClient::new(channel);

        let started = now_ms();
        let reply = client
            .open(OpenRequest {
                services: bindings.names(),
                client_time_ms: started,
            })
            .await?
            .into_inner();
        let token = PeerId::from(reply.token);
        info!(
            session = %token,
            endpoint = %self.config.endpoint,
            clock_skew_ms = reply.server_time_ms - started,
            "session opened"
        );

        // the poll stream is up before open returns
        let (tx, rx) = mpsc::channel(4);
        let first = PollRequest {
            token: token.to_string(),
        };
        let stream = match tx.send(first).await {
            Ok(()) => client.poll(ReceiverStream::new(rx)).await,
            Err(_) => Err(tonic::Status::internal("poll request channel closed")),
        };
        let stream = match stream {
            Ok(response) => response.into_inner(),
            Err(status) => {
                error!(session = %token, error = %status.chain(), "cannot start poll stream");
                let _ = client
                    .close(CloseRequest {
                        token: token.to_string(),
                    })
                    .await;
                return Err(status.into());
            }
        };

        *self.session.write() = Some(Session {
            client: client.clone(),
            token: token.clone(),
        });

        let cancel = CancellationToken::new();
        let poll = tokio::spawn(poll_loop(
            stream,
            tx,
            token.clone(),
            bindings.clone(),
            self.poll_interval,
            cancel.clone(),
        ));
        let ping = tokio::spawn(ping_loop(
            client,
            token,
            bindings,
            self.ping_interval,
            cancel.clone(),
        ));

        *self.tasks.lock() = Some(Tasks {
            cancel,
            handles: vec![poll, ping],
        });

        Ok(())
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        let tasks = self.tasks.lock().take();
        let session = self.session.write().take();

        if let Some(tasks) = tasks {
            tasks.cancel.cancel();
            for handle in tasks.handles {
                let _ = handle.await;
            }
        }

        let Some(Session { mut client, token }) = session else {
            return Ok(());
        };

        match client
            .close(CloseRequest {
                token: token.to_string(),
            })
            .await
        {
            Ok(_) => {
                info!(session = %token, "session closed");
                Ok(())
            }
            Err(status) if status.code() == Code::NotFound => {
                debug!(session = %token, "session already gone on the server");
                Ok(())
            }
            Err(status) => {
                warn!(session = %token, error = %status.chain(), "cannot close session");
                Err(status.into())
            }
        }
    }

    fn abort(&self) {
        if let Some(tasks) = self.tasks.lock().take() {
            tasks.cancel.cancel();
        }
        self.session.write().take();
    }

    fn session(&self) -> Option<PeerId> {
        self.session.read().as_ref().map(|s| s.token.clone())
    }
}

async fn poll_loop(
    mut stream: Streaming<PollReply>,
    tx: mpsc::Sender<PollRequest>,
    token: PeerId,
    bindings: Arc<Bindings>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!(session = %token, "poll loop started");

    loop {
        tokio::select! {
            next = stream.next() => {
                match next {
                    Some(Ok(reply)) => {
                        if reply.code != PollCode::Ok as i32 {
                            info!(session = %token, code = reply.code, "server ended the session");
                            bindings.notify_disconnect(reply.code);
                            break;
                        }
                        deliver(&bindings, reply.items);
                    }
                    Some(Err(status)) => {
                        warn!(session = %token, error = %status.chain(), "poll stream failed");
                        bindings.notify_disconnect(REASON_STREAM_LOST);
                        break;
                    }
                    None => {
                        warn!(session = %token, "poll stream ended");
                        bindings.notify_disconnect(REASON_STREAM_LOST);
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                debug!(session = %token, "poll loop cancelled");
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                debug!(session = %token, "poll loop cancelled");
                break;
            }
        }

        let request = PollRequest {
            token: token.to_string(),
        };
        if tx.send(request).await.is_err() {
            bindings.notify_disconnect(REASON_STREAM_LOST);
            break;
        }
    }
}

// Callbacks run on the poll task, one at a time, in arrival order.
fn deliver(bindings: &Bindings, items: Vec<PollItem>) {
    for item in items {
        let Some(bound) = bindings.service(&item.service) else {
            warn!(service = %item.service, "callback for unknown service");
            continue;
        };
        let Some(descriptor) = bound.host().callback_descriptors().get(&item.method) else {
            warn!(method = %item.method, "callback for unknown method");
            continue;
        };
        let Some(pair) = bound.shared() else {
            continue;
        };

        let res = catch_unwind(AssertUnwindSafe(|| {
            pair.deliver(descriptor, &item.args, bindings.codec())
        }));
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(method = %item.method, error = %e.chain(), "callback dispatch failed");
            }
            Err(_) => error!(method = %item.method, "callback panicked"),
        }
    }
}

async fn ping_loop(
    mut client: RuntimeServiceClient<Channel>,
    token: PeerId,
    bindings: Arc<Bindings>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let request = PingRequest {
                    token: token.to_string(),
                };
                match client.ping(request).await {
                    Ok(_) => debug!(session = %token, "ping acknowledged"),
                    Err(status) => {
                        warn!(session = %token, error = %status.chain(), "ping failed");
                        bindings.notify_disconnect(REASON_PING_FAILED);
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                debug!(session = %token, "ping loop cancelled");
                break;
            }
        }
    }
}

/// Invoker behind client-side service proxies.
struct RemoteInvoker {
    session: SessionSlot,
    codec: WireCodec,
}

#[async_trait]
impl Invoker for RemoteInvoker {
    fn codec(&self) -> &WireCodec {
        &self.codec
    }

    fn post(&self, call: MethodCall) -> Result<(), RuntimeError> {
        Err(RuntimeError::Unsupported(format!(
            "one-way calls are not sent to servers: {}",
            call.method
        )))
    }

    async fn call(&self, call: MethodCall) -> Result<String, Fault> {
        let Some(Session { mut client, token }) = self.session.read().clone() else {
            return Err(RuntimeError::NotOpen.into());
        };

        let request = InvokeRequest {
            token: token.to_string(),
            service: call.service,
            method: call.method,
            args: call.args,
        };
        let method = request.method.clone();
        let service = request.service.clone();

        let reply = client
            .invoke(request)
            .await
            .map_err(RuntimeError::from)?
            .into_inner();

        match InvokeCode::from_i32(reply.code) {
            Some(InvokeCode::Ok) => Ok(reply.payload),
            Some(InvokeCode::Exception) => Err(Fault::Exception(
                self.codec.decode_exception(&reply.payload),
            )),
            Some(InvokeCode::ServiceNotFound) => Err(RuntimeError::ServiceNotFound(service).into()),
            Some(InvokeCode::MethodNotFound) => Err(RuntimeError::MethodNotFound(method).into()),
            Some(InvokeCode::InvalidArguments) => Err(RuntimeError::InvalidArguments {
                method,
                reason: reply.payload,
            }
            .into()),
            Some(InvokeCode::UnknownPeer) => Err(RuntimeError::UnknownPeer(token.to_string()).into()),
            None => Err(RuntimeError::UnexpectedCode(reply.code).into()),
        }
    }
}
