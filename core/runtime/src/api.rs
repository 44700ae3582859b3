// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

pub mod proto {
    pub mod v1 {
        tonic::include_proto!("conduit.runtime.v1");
    }
}

pub use proto::v1::runtime_service_client::RuntimeServiceClient;
pub use proto::v1::runtime_service_server::{RuntimeService, RuntimeServiceServer};
pub use proto::v1::{
    CloseReply, CloseRequest, InvokeReply, InvokeRequest, OpenReply, OpenRequest, PingReply,
    PingRequest, PollItem, PollReply, PollRequest,
};

use crate::proxy::MethodCall;

/// Outcome of an Invoke RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InvokeCode {
    Ok = 0,
    Exception = 1,
    ServiceNotFound = 2,
    MethodNotFound = 3,
    InvalidArguments = 4,
    UnknownPeer = 5,
}

impl InvokeCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(InvokeCode::Ok),
            1 => Some(InvokeCode::Exception),
            2 => Some(InvokeCode::ServiceNotFound),
            3 => Some(InvokeCode::MethodNotFound),
            4 => Some(InvokeCode::InvalidArguments),
            5 => Some(InvokeCode::UnknownPeer),
            _ => None,
        }
    }
}

/// Status carried by every poll reply. Anything but `Ok` ends the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PollCode {
    Ok = 0,
    Shutdown = 1,
    Evicted = 2,
}

/// Local disconnect reason: the poll stream broke.
pub const REASON_STREAM_LOST: i32 = -1;
/// Local disconnect reason: a heartbeat was not acknowledged.
pub const REASON_PING_FAILED: i32 = -2;

impl InvokeReply {
    pub fn with_code(code: InvokeCode, payload: impl Into<String>) -> Self {
        InvokeReply {
            code: code as i32,
            payload: payload.into(),
        }
    }
}

impl PollReply {
    pub fn with_code(code: PollCode) -> Self {
        PollReply {
            code: code as i32,
            items: Vec::new(),
        }
    }
}

impl From<MethodCall> for PollItem {
    fn from(call: MethodCall) -> Self {
        PollItem {
            service: call.service,
            method: call.method,
            args: call.args,
        }
    }
}

impl From<PollItem> for MethodCall {
    fn from(item: PollItem) -> Self {
        MethodCall {
            service: item.service,
            method: item.method,
            args: item.args,
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
