// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, bail};
use clap::Parser;
use conduit_config::component::{Component, ComponentBuilder};
use conduit_runtime::{ContextEvent, Side};
use conduit_testing::{DemoContextBuilder, Exit, wait_for_exit};
use conduit_testing::config::DemoConfig;
use conduit_testing::contracts::{Counter, Directory};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Connects to a conduit server and prints its callbacks", long_about = None)]
pub struct Args {
    /// Configuration file with `tracing` and `context` sections
    #[arg(short, long, value_name = "CONFIGURATION", env = "CONDUIT_CONFIG")]
    config: String,

    /// Names to register in the shared directory
    #[arg(short, long, value_name = "NAME")]
    register: Vec<String>,

    /// Tags attached to every registered name
    #[arg(short, long, value_name = "TAG")]
    tag: Vec<String>,

    /// Amount added to this client's counter
    #[arg(short, long, value_name = "DELTA", default_value_t = 1)]
    add: i64,

    /// Leave after the calls instead of waiting for a shutdown signal
    #[arg(short, long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = DemoConfig::load(&args.config)
        .with_context(|| format!("cannot load {}", args.config))?;
    config.tracing.setup_tracing_subscriber();

    if config.context.side() != Side::Client {
        bail!("{} does not describe a client transport", args.config);
    }

    let name = config.context.name.clone();
    let mut context = DemoContextBuilder::new()
        .build_with_config(&name, &config.context)
        .context("cannot build the client context")?;
    let mut events = context.subscribe();

    context.start().await.context("cannot connect to the server")?;
    info!(session = ?context.session().map(|s| s.to_string()), "connected");

    let directory = context.service::<dyn Directory>()?;
    for name in &args.register {
        match directory.register(name.clone(), args.tag.clone()).await {
            Ok(entry) => info!(name = %entry.name, id = entry.id, "registered"),
            Err(e) => warn!(%name, error = %e, "registration refused"),
        }
    }
    for entry in directory.list().await? {
        info!(name = %entry.name, id = entry.id, tags = ?entry.tags, "directory entry");
    }

    let counter = context.service::<dyn Counter>()?;
    let value = counter.add(args.add).await?;
    info!(value, "counter updated");

    if !args.once {
        let exit = wait_for_exit(&mut events, conduit_signal::shutdown(), |event| {
            debug!(?event, "context event")
        })
        .await;
        match exit {
            Exit::Signal => info!("received shutdown signal"),
            Exit::Disconnected(reason) => {
                warn!(reason, "server went away");
                return Ok(());
            }
            Exit::EventsClosed => {}
        }
    }

    context.stop().await.context("cannot close the session")?;
    Ok(())
}
