//! Relay node daemon and the `tourney` command-line client.

pub mod config;
pub mod node;

pub use config::{ConfigError, ConfigFile, DaemonArgs, DaemonConfig};
pub use node::Node;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber with `RUST_LOG` plus `directives`
/// (comma separated, default `tourney=info`).
pub fn init_tracing(directives: Option<&str>) -> anyhow::Result<()> {
    let mut filter = EnvFilter::from_default_env();
    for directive in directives.unwrap_or("tourney=info").split(',') {
        let directive = directive.trim();
        if !directive.is_empty() {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
