// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::peer::PeerId;

/// Why a peer left the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerExit {
    /// The client closed its session.
    Closed,
    /// No heartbeat within the peer timeout.
    Evicted,
    /// The server context shut down.
    Shutdown,
}

impl fmt::Display for PeerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerExit::Closed => "closed",
            PeerExit::Evicted => "evicted",
            PeerExit::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Lifecycle notifications published by a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    Opened,
    Closed,
    HostOpened { service: &'static str },
    HostClosed { service: &'static str },
    PeerConnected { peer: PeerId },
    PeerDisconnected { peer: PeerId, reason: PeerExit },
    /// The client lost its server; carries the poll code or a negative
    /// local reason.
    Disconnected { reason: i32 },
}
