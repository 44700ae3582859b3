// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

/// Resolves once the process is asked to stop. If the handlers cannot be
/// registered the future never resolves.
pub async fn shutdown() {
    imp::shutdown().await
}

#[cfg(unix)]
mod imp {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::{error, info};

    pub(super) async fn shutdown() {
        tokio::select! {
            // this will handle interrupt signal by users
            _ = sig(SignalKind::interrupt(), "SIGINT") => {}
            // this will handle SIGTERM signal
            // e.g. k8s send this signal to stop the container
            _ = sig(SignalKind::terminate(), "SIGTERM") => {}
        };
    }

    async fn sig(kind: SignalKind, name: &str) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(
                    target: "conduit::signal",
                    "received signal {}, starting shutdown",
                    name,
                );
            }
            Err(e) => {
                error!(target: "conduit::signal", error = %e, "failed to register {} handler", name);
                std::future::pending::<()>().await
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use tracing::{error, info};

    pub(super) async fn shutdown() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(
                target: "conduit::signal",
                "received signal Ctrl-C, starting shutdown",
            ),
            Err(e) => {
                error!(target: "conduit::signal", error = %e, "failed to register Ctrl-C handler");
                std::future::pending::<()>().await
            }
        }
    }
}
