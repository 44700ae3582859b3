// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Lifecycle of a service host.
///
/// ```text
/// None -> Opening -> Open -> Closing -> Closed
///            |                  |
///            +---> Faulted <----+
/// ```
///
/// Abort returns any state to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    None,
    Opening,
    Open,
    Closing,
    Closed,
    Faulted,
}

impl ServiceState {
    pub fn is_open(&self) -> bool {
        matches!(self, ServiceState::Open)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::None => "none",
            ServiceState::Opening => "opening",
            ServiceState::Open => "open",
            ServiceState::Closing => "closing",
            ServiceState::Closed => "closed",
            ServiceState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}
