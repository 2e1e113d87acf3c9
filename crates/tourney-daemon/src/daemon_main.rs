//! Relay node.
//!
//!   tourney-daemon --server-name "Moon's Server" --address relay.example.net
//!   tourney-daemon --config tourney.toml --master master.example.net:2052

use clap::Parser;
use tourney_daemon::{DaemonArgs, DaemonConfig, Node};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DaemonArgs::parse();
    let config = DaemonConfig::resolve(&args)?;
    tourney_daemon::init_tracing(config.log.as_deref())?;

    tracing::info!("Starting {} on port {}", config.server_name, config.port);
    let node = Node::start(config).await?;

    node.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    Ok(())
}
