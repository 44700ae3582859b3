// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, bail};
use clap::Parser;
use conduit_config::component::{Component, ComponentBuilder};
use conduit_runtime::{ContextEvent, Side};
use conduit_testing::{DemoContextBuilder, Exit, wait_for_exit};
use conduit_testing::config::DemoConfig;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(version, about = "Hosts the sample directory and counter contracts", long_about = None)]
pub struct Args {
    /// Configuration file with `tracing` and `context` sections
    #[arg(short, long, value_name = "CONFIGURATION", env = "CONDUIT_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = DemoConfig::load(&args.config)
        .with_context(|| format!("cannot load {}", args.config))?;
    config.tracing.setup_tracing_subscriber();
    debug!(tracing = ?config.tracing);

    if config.context.side() != Side::Server {
        bail!("{} does not describe a server transport", args.config);
    }

    let name = config.context.name.clone();
    let mut context = DemoContextBuilder::new()
        .build_with_config(&name, &config.context)
        .context("cannot build the server context")?;
    let mut events = context.subscribe();

    context.start().await.context("cannot open the server context")?;
    info!(id = %context.identifier(), endpoints = ?context.endpoints(), "server ready");

    let exit = wait_for_exit(&mut events, conduit_signal::shutdown(), |event| match event {
        ContextEvent::PeerConnected { peer } => {
            info!(%peer, peers = context.peers().len(), "peer joined");
        }
        ContextEvent::PeerDisconnected { peer, reason } => {
            info!(%peer, %reason, peers = context.peers().len(), "peer left");
        }
        event => debug!(?event, "context event"),
    })
    .await;
    if exit == Exit::Signal {
        info!("received shutdown signal");
    }

    context.stop().await.context("cannot close the server context")?;
    Ok(())
}
