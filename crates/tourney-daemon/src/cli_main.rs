//! Command-line client for relay nodes.
//!
//!   tourney scrape 10.0.0.1:2052 10.0.0.2:2052
//!   tourney discover master.example.net:2052
//!   tourney send 10.0.0.1:2052 '{"id":"67e55044-10b1-426f-9247-bb680e5fe0c8","payload":{"command":{"type":"heartbeat"}}}' --wait
//!   tourney watch 10.0.0.1:2052

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tourney_core::{
    ClientType, CoreServer, MirrorChange, Packet, Request, State, StateMirror, PROTOCOL_VERSION,
};
use tourney_net::{
    ClientConfig, HostScraper, ScrapeIdentity, ScrapeProgress, ScraperConfig, TcpClient,
    TransportEvent,
};

#[derive(Parser)]
#[command(name = "tourney", version, about = "Talk to tournament relay nodes")]
struct Cli {
    /// Name sent in Connect requests
    #[arg(long, env = "TOURNEY_NAME", default_value = "tourney-cli", global = true)]
    name: String,

    #[arg(long, default_value_t = 4000, global = true)]
    connect_timeout_ms: u64,

    #[arg(long, default_value_t = 4000, global = true)]
    response_timeout_ms: u64,

    /// Log filter, e.g. `tourney=debug`
    #[arg(long, env = "TOURNEY_LOG", global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the State of each host
    Scrape {
        #[arg(required = true)]
        hosts: Vec<CoreServer>,
    },
    /// Follow known_servers from the seeds until no new hosts turn up
    Discover {
        #[arg(required = true)]
        seeds: Vec<CoreServer>,
    },
    /// Deliver one JSON packet to a host
    Send {
        host: CoreServer,
        packet: String,
        /// Wait for and print the reply
        #[arg(long)]
        wait: bool,
    },
    /// Mirror a host's State and log every change
    Watch {
        host: CoreServer,
        #[arg(long, default_value_t = 10)]
        heartbeat_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tourney_daemon::init_tracing(cli.log.as_deref())?;

    let scraper = HostScraper::new(
        ScrapeIdentity {
            name: cli.name.clone(),
            user_id: String::new(),
        },
        ScraperConfig {
            connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
            response_timeout: Duration::from_millis(cli.response_timeout_ms),
            ..ScraperConfig::default()
        },
    );

    match cli.command {
        Command::Scrape { hosts } => {
            let states = scraper.scrape_hosts(hosts, report).await;
            print_states(states)?;
        }
        Command::Discover { seeds } => {
            let states = scraper.discover(seeds, report).await;
            print_states(states)?;
        }
        Command::Send { host, packet, wait } => {
            let packet: Packet = serde_json::from_str(&packet).context("packet is not valid JSON")?;
            if wait {
                let reply = scraper.request_response(&host, &packet).await?;
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                scraper.send_packet_to_host(&host, &packet).await?;
                tracing::info!("Sent {} to {}", packet.describe(), host);
            }
        }
        Command::Watch {
            host,
            heartbeat_secs,
        } => {
            let config = ClientConfig {
                connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
                heartbeat: (heartbeat_secs > 0).then(|| Duration::from_secs(heartbeat_secs)),
            };
            watch(host, config, cli.name).await?;
        }
    }

    Ok(())
}

fn report(progress: &ScrapeProgress) {
    tracing::info!(
        "[{}/{}] {} ({} ok, {} failed)",
        progress.completed(),
        progress.total,
        progress.host,
        progress.succeeded,
        progress.failed
    );
}

fn print_states(states: HashMap<CoreServer, State>) -> anyhow::Result<()> {
    let sorted: BTreeMap<String, State> = states
        .into_iter()
        .map(|(host, state)| (host.to_string(), state))
        .collect();
    println!("{}", serde_json::to_string_pretty(&sorted)?);
    Ok(())
}

async fn watch(host: CoreServer, config: ClientConfig, name: String) -> anyhow::Result<()> {
    let client = TcpClient::new(host.clone(), config);
    let mut events = client.subscribe();
    client
        .start()
        .await
        .with_context(|| format!("could not connect to {host}"))?;

    let connect = Packet::new(Request::Connect {
        client_type: ClientType::Coordinator,
        name,
        user_id: String::new(),
        client_version: PROTOCOL_VERSION,
    });
    client.send(&connect).await?;

    let mut mirror = StateMirror::new();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        match event {
            Some(TransportEvent::Packet { packet, .. }) => match mirror.observe(&packet) {
                Ok(MirrorChange::Replaced) => {
                    let state = mirror.state();
                    tracing::info!(
                        "Synced: {} tournament(s), {} known server(s)",
                        state.tournaments.len(),
                        state.known_servers.len()
                    );
                }
                Ok(MirrorChange::Applied(changed)) => {
                    tracing::info!("{} (changed: {})", packet.describe(), changed);
                }
                Ok(MirrorChange::Ignored) => tracing::debug!("{}", packet.describe()),
                Err(e) => tracing::warn!("Could not apply {}: {}", packet.describe(), e),
            },
            Some(TransportEvent::Disconnected(_)) | None => {
                if !mirror.is_synced() {
                    bail!("{host} disconnected before sending its state");
                }
                tracing::info!("{} disconnected", host);
                return Ok(());
            }
            Some(_) => {}
        }
    }

    client.shutdown().await;
    println!("{}", serde_json::to_string_pretty(mirror.state())?);
    Ok(())
}
